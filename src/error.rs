use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PacktraceError {
    #[error("Tracer error: {0}")]
    Tracer(#[from] TracerError),

    #[error("Package error: {0}")]
    Package(#[from] PackageError),

    #[error("Mirror error: {0}")]
    Mirror(#[from] MirrorError),

    #[error("Output error: {0}")]
    Output(#[from] OutputError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum TracerError {
    #[error("Failed to attach to root process: {0}")]
    Attach(#[source] nix::Error),

    #[error("Ptrace error: {0}")]
    Ptrace(#[source] nix::Error),

    #[error("Wait failed: {0}")]
    Wait(#[source] nix::Error),

    #[error("Tracee memory inaccessible at {addr:#x}: {source}")]
    AccessFault {
        addr: u64,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Process {0} not found in state map")]
    ProcessNotFound(i32),

    #[error("Architecture not supported: {0}")]
    UnsupportedArch(String),
}

#[derive(Error, Debug)]
pub enum PackageError {
    #[error("Failed to create package directory {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Package root not found at {0} (capture a package with `packtrace pack` first)")]
    MissingRoot(PathBuf),

    #[error("Failed to write session metadata {path}: {source}")]
    Metadata {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("Source unreadable: {path}: {source}")]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path} into package: {source}")]
    Destination {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum OutputError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PacktraceError>;
