use thiserror::Error;

/// Errors produced while opening or decoding an HDF5 file.
///
/// Every decoder is a pure function of a byte range; an error is fatal for
/// the operation in progress and carries enough context to locate the
/// offending structure. `inspect` is the one caller that swallows the
/// `Unsupported*` variants per child so one unreadable dataset does not
/// sink enumeration of the rest of the file.
#[derive(Debug, Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no HDF5 signature at any supported start offset")]
    BadSignature,
    #[error("read past the end of the file")]
    TruncatedFile,
    #[error("unsupported superblock version {0}")]
    UnsupportedSuperblockVersion(u8),
    #[error("unsupported object header version {0}")]
    UnsupportedObjectHeaderVersion(u8),
    #[error("unsupported datatype version {0}")]
    UnsupportedDatatypeVersion(u8),
    #[error("unsupported data layout version {0}")]
    UnsupportedLayoutVersion(u8),
    #[error("unsupported filter id {0}")]
    UnsupportedFilter(u16),
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(&'static str),
    #[error("path not found: {0}")]
    PathNotFound(String),
    #[error("not a dataset: {0}")]
    NotADataset(String),
    #[error("not a group: {0}")]
    NotAGroup(String),
    #[error("selection out of bounds: {0}")]
    SliceOutOfBounds(String),
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
    #[error("corrupt file: {0}")]
    Corrupt(String),
}

impl Error {
    /// True for the variants that mark a structure this reader does not
    /// implement, as opposed to a malformed or missing one.
    pub fn is_unsupported(&self) -> bool {
        matches!(
            self,
            Error::UnsupportedSuperblockVersion(_)
                | Error::UnsupportedObjectHeaderVersion(_)
                | Error::UnsupportedDatatypeVersion(_)
                | Error::UnsupportedLayoutVersion(_)
                | Error::UnsupportedFilter(_)
                | Error::UnsupportedFeature(_)
        )
    }
}

impl<'a> From<nom::Err<nom::error::VerboseError<&'a [u8]>>> for Error {
    fn from(e: nom::Err<nom::error::VerboseError<&'a [u8]>>) -> Self {
        match e {
            nom::Err::Incomplete(_) => Error::TruncatedFile,
            nom::Err::Error(e) | nom::Err::Failure(e) => Error::Corrupt(render(&e)),
        }
    }
}

/// Render the nom context chain innermost-first, e.g. "tag in superblock".
fn render(e: &nom::error::VerboseError<&[u8]>) -> String {
    let mut parts = Vec::new();
    for (_, kind) in &e.errors {
        match kind {
            nom::error::VerboseErrorKind::Context(c) => parts.push(*c),
            nom::error::VerboseErrorKind::Nom(k) => parts.push(k.description()),
            nom::error::VerboseErrorKind::Char(_) => {}
        }
    }
    parts.join(" in ")
}
