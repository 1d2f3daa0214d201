use thiserror::Error;

/// Broken internal invariant. Continuing would silently corrupt the output, so these abort the run.
#[derive(Debug, Error)]
pub(crate) enum InvariantViolation {
    #[error("class name collision in library '{library}': {name}")]
    NameCollision { library: String, name: String },
    #[error("member collision in class {class}: {member}")]
    MemberCollision { class: String, member: String },
    #[error("partition mismatch after {operation}: expected {expected}, found {actual}")]
    PartitionMismatch {
        operation: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("static initializer of {class} does not end in a single return")]
    UnsplicableInitializer { class: String },
    #[error("label {label} is not present in the instruction list")]
    MissingLabel { label: u32 },
}
