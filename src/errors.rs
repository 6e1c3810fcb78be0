use cvm_derive::Error;

/// Errors that can occur while parsing, compiling, or running a program.
///
/// Parse-stage variants carry the fixed diagnostic wording the parser
/// prints in its `Parse Error for '<msg>' at '<token>' in line(<n>).`
/// lines; the surrounding context (token, line number) is supplied by the
/// reporter, not the variant. Compile and runtime variants interpolate
/// their own context.
#[derive(Debug, Error)]
pub enum CvmError {
    // Parse diagnostics.
    /// Numeric token does not fit the target width.
    #[error("Number too large")]
    NumberTooLarge,
    /// Token is not a valid number.
    #[error("Unrecognized number")]
    UnrecognizedNumber,
    /// Token is not a valid `#index` data reference.
    #[error("Unrecognized data index")]
    UnrecognizedDataIndex,
    /// Malformed register token.
    #[error("Unrecognized register")]
    UnrecognizedRegister,
    /// Register environment qualifier is not `env`, `penv`, or `tenv`.
    #[error("Unrecognized environment")]
    UnrecognizedEnvironment,
    /// `%` escape in an identifier is not `%%` or `%#`.
    #[error("Unrecognized escape")]
    UnrecognizedEscape,
    /// Unknown opcode mnemonic.
    #[error("Unrecognized instruction")]
    UnrecognizedInstruction,
    /// Unknown directive for the current section.
    #[error("Unrecognized command")]
    UnrecognizedCommand,
    /// Instruction line seen before any `.func` section.
    #[error("instruction outside a function section")]
    InstructionOutsideFunction,

    // Symbol resolution.
    /// Type name is not in the registry.
    #[error("Unfind type")]
    UndefinedType,
    /// Function name is not in the program.
    #[error("Unfind function '{name}'")]
    UndefinedFunction { name: String },
    /// Type name declared more than once.
    #[error("type name duplicate")]
    DuplicateType,
    /// Function name declared more than once.
    #[error("func name duplicate")]
    DuplicateFunction,
    /// Data index declared more than once.
    #[error("data index duplicate")]
    DuplicateDataIndex,

    /// The source was rejected; individual diagnostics were already
    /// reported with line numbers.
    #[error("{count} parse error(s)")]
    ParseFailed { count: usize },

    // Compile errors.
    /// Register reference does not fit the function's register layout.
    #[error(
        "register %{index} out of range (function has {dynamic} dynamic and {statics} static registers)"
    )]
    RegisterOutOfRange {
        index: u16,
        dynamic: usize,
        statics: usize,
    },
    /// Instruction references a data index absent from the data section.
    #[error("undefined data index #{index}")]
    UndefinedData { index: u32 },
    /// Instruction carries a type index absent from the registry.
    #[error("undefined type index {index}")]
    UndefinedTypeIndex { index: u32 },

    // Runtime errors.
    /// Register index exceeds the targeted register file.
    #[error("register index {index} out of bounds ({available} available)")]
    InvalidRegisterIndex { index: u16, available: usize },
    /// `%penv` qualifier used in an environment with no parent.
    #[error("no parent environment")]
    NoParentEnvironment,
    /// `%tenv` qualifier used in an environment with no temporary sibling.
    #[error("no temporary environment")]
    NoTempEnvironment,
    /// A compiled instruction violated an execution invariant. Does not
    /// occur after a clean compile.
    #[error("malformed runtime instruction: {reason}")]
    MalformedInstruction { reason: &'static str },

    /// File I/O failure in the driver.
    #[error("failed to read '{path}': {source}")]
    IoError { path: String, source: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_diagnostics_use_fixed_wording() {
        assert_eq!(CvmError::NumberTooLarge.to_string(), "Number too large");
        assert_eq!(CvmError::DuplicateType.to_string(), "type name duplicate");
        assert_eq!(
            CvmError::DuplicateFunction.to_string(),
            "func name duplicate"
        );
        assert_eq!(
            CvmError::DuplicateDataIndex.to_string(),
            "data index duplicate"
        );
        assert_eq!(CvmError::UndefinedType.to_string(), "Unfind type");
    }

    #[test]
    fn contextual_variants_interpolate_fields() {
        let err = CvmError::RegisterOutOfRange {
            index: 7,
            dynamic: 2,
            statics: 1,
        };
        assert_eq!(
            err.to_string(),
            "register %7 out of range (function has 2 dynamic and 1 static registers)"
        );

        let err = CvmError::InvalidRegisterIndex {
            index: 3,
            available: 0,
        };
        assert_eq!(
            err.to_string(),
            "register index 3 out of bounds (0 available)"
        );
    }
}
