use thiserror::Error;

/// Byte-level failures raised by [`crate::codec::TnglReader`] and
/// [`crate::codec::TnglWriter`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("out of bounds: {requested} byte(s) at position {position} of {length}")]
    OutOfBounds {
        position: usize,
        requested: usize,
        length: usize,
    },
    #[error("unsupported integer width {0} (expected 1, 2, 4, 6 or 8)")]
    InvalidWidth(usize),
    #[error("value {value} does not fit into {width} byte(s)")]
    ValueOverflow { value: i128, width: usize },
}

/// Everything that can abort a compile call. Partial bytecode is discarded
/// whenever one of these is returned.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error("unknown word \"{word}\" at offset {offset}")]
    UnknownWord { word: String, offset: usize },
    #[error("unresolved variable \"{name}\" at offset {offset}")]
    UnresolvedVariable { name: String, offset: usize },
    #[error("{kind} declarations are not supported in this version of the compiler")]
    UnsupportedDeclaration { kind: &'static str },
    #[error("\"{name}\" is a reserved word and cannot be declared")]
    ReservedWord { name: String },
    #[error("malformed {kind} literal \"{text}\"")]
    MalformedLiteral { kind: &'static str, text: String },
    #[error("unexpected characters \"{text}\" at offset {offset}")]
    UnexpectedCharacters { text: String, offset: usize },
    #[error("unbalanced scope: unexpected '}}' at offset {offset}")]
    UnbalancedScope { offset: usize },
    #[error("variable address space exhausted")]
    AddressSpaceExhausted,
    #[error("preprocessor: {0}")]
    Preprocess(String),
    #[error("#error {0}")]
    Directive(String),
    #[error("codec: {0}")]
    Codec(#[from] CodecError),
}
