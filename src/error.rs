use std::path::PathBuf;

use thiserror::Error;

use crate::schema::DocKind;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to read schema file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("schema file {} contains no {kind} entries", path.display())]
    NoEntries { kind: DocKind, path: PathBuf },

    #[error("no schema source found for {kind}")]
    NotFound { kind: DocKind },

    #[error("failed to watch {}: {source}", path.display())]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}
