use thiserror::Error;

/// Errors surfaced by the piece buffer.
///
/// Most reads in this crate clamp out-of-range input rather than error (see
/// the individual method docs on [`crate::piece_tree::PieceTree`]). These
/// variants are reserved for the cases the public interface defines as
/// genuine failures: a caller handed us a snapshot from a different buffer,
/// or an invariant check (only compiled in with `debug_assertions`) tripped.
#[derive(Debug, Error)]
pub enum BufferError {
    #[error("snapshot does not belong to this buffer")]
    ForeignSnapshot,

    #[error("internal invariant violated: {0}")]
    InvariantViolation(String),
}

pub type Result<T> = std::result::Result<T, BufferError>;
