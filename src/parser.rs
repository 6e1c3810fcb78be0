//! Textual assembly parser.
//!
//! Converts line-oriented source into a [`Program`]: the type registry,
//! the literal data section, and one [`FunctionInfo`] per `.func` section.
//!
//! # Syntax
//!
//! ```text
//! ; comment to end of line
//! .type u32            ; section header in column 0
//!   size 4             ; directive (leading whitespace, `.`-less or `.`-led)
//! .datas
//!   data #1 0xDEADBEEF 4
//! .program
//!   entry main
//! .func main
//!   dyvarb 1
//!   load %1, #1, u32   ; instruction (leading whitespace)
//!   ret
//! ```
//!
//! - Tokens separate on spaces, tabs, and commas
//! - Registers: `%res`, `%0`, `%<class><index>[(%env|%penv|%tenv)]`
//! - Identifiers escape `%` and `#` as `%%` and `%#`
//! - Immediates are decimal, or hex with `0x`
//!
//! Diagnostics print with their line number and parsing continues, so one
//! run surfaces every error in the file; the source is rejected afterwards
//! if any were reported.

use crate::errors::CvmError;
use crate::inststruct::{
    Data, DataIndex, EnvQualifier, FunctionInfo, Instruction, Register, RegisterClass,
};
use crate::program::{LiteralDataPool, Program, TypeIndex, TypeInfo, TypeRegistry};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

const COMMENT_CHAR: char = ';';

/// Sections recognised by `.name` headers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Section {
    None,
    Program,
    Imports,
    Exports,
    Datas,
    Module,
    Func,
    Type,
}

fn section_from_name(name: &str) -> Option<Section> {
    match name {
        "program" => Some(Section::Program),
        "imports" => Some(Section::Imports),
        "exports" => Some(Section::Exports),
        "datas" => Some(Section::Datas),
        "module" => Some(Section::Module),
        "func" => Some(Section::Func),
        "type" => Some(Section::Type),
        _ => None,
    }
}

/// Parser state for one source file.
struct ParseInfo {
    types: TypeRegistry,
    datas: LiteralDataPool,
    functions: HashMap<String, FunctionInfo>,
    entry: Option<String>,
    current_func: Option<String>,
    current_type: Option<TypeIndex>,
    section: Section,
    line: usize,
    errors: usize,
}

impl ParseInfo {
    fn new() -> Self {
        Self {
            types: TypeRegistry::new(),
            datas: LiteralDataPool::new(),
            functions: HashMap::new(),
            entry: None,
            current_func: None,
            current_type: None,
            section: Section::None,
            line: 0,
            errors: 0,
        }
    }

    /// Reports a diagnostic without token context.
    fn report(&mut self, err: CvmError) {
        self.errors += 1;
        eprintln!("Parse Error for '{}' in line({}).", err, self.line);
    }

    /// Reports a diagnostic pointing at the offending token.
    fn report_at(&mut self, err: CvmError, token: &str) {
        self.errors += 1;
        eprintln!(
            "Parse Error for '{}' at '{}' in line({}).",
            err, token, self.line
        );
    }

    /// Reports a malformed line with no further detail.
    fn report_line(&mut self) {
        self.errors += 1;
        eprintln!("Parse Error in line({}).", self.line);
    }

    fn current_func_mut(&mut self) -> Option<&mut FunctionInfo> {
        let name = self.current_func.as_ref()?;
        self.functions.get_mut(name)
    }
}

/// Parses a complete source file into a [`Program`].
///
/// Diagnostics go to stderr as they are found. Returns
/// [`CvmError::ParseFailed`] with the diagnostic count if any line was
/// rejected.
pub fn parse_source(source: &str) -> Result<Program, CvmError> {
    let mut info = ParseInfo::new();

    for (number, raw) in source.lines().enumerate() {
        info.line = number + 1;

        let line = match raw.find(COMMENT_CHAR) {
            Some(pos) => &raw[..pos],
            None => raw,
        };
        if line.trim().is_empty() {
            continue;
        }

        parse_line(&mut info, line);
    }

    if info.errors > 0 {
        return Err(CvmError::ParseFailed { count: info.errors });
    }

    Ok(Program {
        types: info.types,
        datas: info.datas,
        functions: info.functions,
        entry: info.entry,
    })
}

/// Convenience: parse directly from a file path.
pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<Program, CvmError> {
    let path = path.as_ref();
    let source = fs::read_to_string(path).map_err(|e| CvmError::IoError {
        path: path.display().to_string(),
        source: e.to_string(),
    })?;
    parse_source(&source)
}

fn tokenize(line: &str) -> Vec<&str> {
    line.split([' ', '\t', ','])
        .filter(|token| !token.is_empty())
        .collect()
}

fn parse_line(info: &mut ParseInfo, line: &str) {
    let first = match line.chars().next() {
        Some(c) => c,
        None => return,
    };

    if first == '.' {
        parse_section_header(info, line);
    } else if first == ' ' || first == '\t' {
        parse_body_line(info, line.trim_start());
    } else {
        info.report_line();
    }
}

/// Dispatches a whitespace-led line to the directive or instruction path.
///
/// Directives may be written with or without their leading dot; a dotless
/// token counts as a directive when the current section knows it.
fn parse_body_line(info: &mut ParseInfo, body: &str) {
    let tokens = tokenize(body);
    let first = match tokens.first() {
        Some(&first) => first,
        None => {
            info.report_line();
            return;
        }
    };

    match first.strip_prefix('.') {
        Some(name) => parse_directive(info, name, &tokens[1..]),
        None if is_directive(info.section, first) => parse_directive(info, first, &tokens[1..]),
        None => parse_instruction_line(info, &tokens),
    }
}

/// Whether `name` is a directive of `section`.
fn is_directive(section: Section, name: &str) -> bool {
    matches!(
        (section, name),
        (Section::Func, "arg" | "data" | "dyvarb" | "stvarb")
            | (Section::Program, "entry")
            | (Section::Type, "size")
            | (Section::Datas, "data")
    )
}

/// Handles a `.name <arg>*` line in column 0.
fn parse_section_header(info: &mut ParseInfo, line: &str) {
    let tokens = tokenize(line);
    let section = match section_from_name(&tokens[0][1..]) {
        Some(section) => section,
        None => {
            info.report_line();
            return;
        }
    };
    info.section = section;

    match section {
        Section::Func => {
            if tokens.len() != 2 {
                info.report_line();
                return;
            }
            let name = match parse_identifier(info, tokens[1]) {
                Some(name) => name,
                None => return,
            };
            if info.functions.contains_key(&name) {
                info.report(CvmError::DuplicateFunction);
            } else {
                info.functions.insert(name.clone(), FunctionInfo::default());
                info.current_func = Some(name);
            }
        }
        Section::Type => {
            if tokens.len() != 2 {
                info.report_line();
                return;
            }
            let name = match parse_identifier(info, tokens[1]) {
                Some(name) => name,
                None => return,
            };
            match info.types.insert(&name, TypeInfo::default()) {
                Ok(index) => info.current_type = Some(index),
                Err(err) => info.report(err),
            }
        }
        _ => {}
    }
}

/// Handles a directive inside a section.
fn parse_directive(info: &mut ParseInfo, name: &str, args: &[&str]) {
    match (info.section, name) {
        // Reserved for an undefined calling convention.
        (Section::Func, "arg") | (Section::Func, "data") => {}
        (Section::Func, "dyvarb") => {
            if args.len() != 1 {
                info.report_line();
                return;
            }
            let count = match parse_number::<usize>(info, args[0]) {
                Some(count) => count,
                None => return,
            };
            match info.current_func_mut() {
                Some(func) => func.dyvarb_count = count,
                None => info.report_line(),
            }
        }
        (Section::Func, "stvarb") => {
            if args.len() != 2 {
                info.report_line();
                return;
            }
            let count = match parse_number::<usize>(info, args[0]) {
                Some(count) => count,
                None => return,
            };
            let ty = match parse_type(info, args[1]) {
                Some(ty) => ty,
                None => return,
            };
            match info.current_func_mut() {
                Some(func) => func
                    .stvarb_typelist
                    .extend(std::iter::repeat(ty).take(count)),
                None => info.report_line(),
            }
        }
        (Section::Program, "entry") => {
            if args.len() != 1 {
                info.report_line();
                return;
            }
            if let Some(name) = parse_identifier(info, args[0]) {
                info.entry = Some(name);
            }
        }
        (Section::Type, "size") => {
            if args.len() != 1 {
                info.report_line();
                return;
            }
            let size = match parse_number::<usize>(info, args[0]) {
                Some(size) => size,
                None => return,
            };
            match info.current_type {
                Some(index) => info.types.at_mut(index).size = size,
                None => info.report_line(),
            }
        }
        (Section::Datas, "data") => parse_data_directive(info, args),
        _ => info.report_at(CvmError::UnrecognizedCommand, name),
    }
}

/// Handles `data #<index> 0x<hex> <capacity>` in the `.datas` section.
///
/// The hex payload is a number stored little-endian into a zeroed
/// `capacity`-byte blob; a payload longer than the capacity is rejected.
fn parse_data_directive(info: &mut ParseInfo, args: &[&str]) {
    if args.len() != 3 {
        info.report_line();
        return;
    }
    let index = match parse_data_index(info, args[0]) {
        Some(index) => index,
        None => return,
    };
    if info.datas.get(index.0).is_some() {
        info.report(CvmError::DuplicateDataIndex);
        return;
    }
    let capacity = match parse_number::<usize>(info, args[2]) {
        Some(capacity) => capacity,
        None => return,
    };
    let hex = args[1];
    if hex.len() <= 2 || !hex.starts_with("0x") {
        info.report_at(CvmError::UnrecognizedNumber, hex);
        eprintln!("Only hex unsigned integer is supported in data section.");
        return;
    }
    let digits = &hex[2..];
    if digits.len() / 2 > capacity {
        info.report_at(CvmError::NumberTooLarge, hex);
        return;
    }

    let mut blob = vec![0u8; capacity];
    match decode_hex_le(digits, &mut blob) {
        Ok(()) => {
            // Duplicate check above makes this insert infallible.
            let _ = info.datas.insert(index.0, blob);
        }
        Err(err) => info.report_at(err, hex),
    }
}

/// Decodes a hex numeral into `buffer` least-significant byte first.
fn decode_hex_le(digits: &str, buffer: &mut [u8]) -> Result<(), CvmError> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(CvmError::UnrecognizedNumber);
    }

    let mut end = digits.len();
    let mut slot = 0;
    while end > 0 && slot < buffer.len() {
        let start = end.saturating_sub(2);
        buffer[slot] =
            u8::from_str_radix(&digits[start..end], 16).map_err(|_| CvmError::UnrecognizedNumber)?;
        slot += 1;
        end = start;
    }
    Ok(())
}

/// Handles an `opcode <operand>*` line, appending to the current function.
fn parse_instruction_line(info: &mut ParseInfo, tokens: &[&str]) {
    let opcode = tokens[0];

    let inst = match opcode {
        "mov" => {
            if tokens.len() != 3 {
                info.report_line();
                return;
            }
            let dst = match parse_register(info, tokens[1]) {
                Some(reg) => reg,
                None => return,
            };
            let src = match parse_register(info, tokens[2]) {
                Some(reg) => reg,
                None => return,
            };
            Instruction::Move { dst, src }
        }
        "load" => {
            if tokens.len() != 4 {
                info.report_line();
                return;
            }
            let dst = match parse_register(info, tokens[1]) {
                Some(reg) => reg,
                None => return,
            };
            let ty = match parse_type(info, tokens[3]) {
                Some(ty) => ty,
                None => return,
            };
            if tokens[2].starts_with('#') {
                let index = match parse_data_index(info, tokens[2]) {
                    Some(index) => index,
                    None => return,
                };
                Instruction::LoadData { dst, index, ty }
            } else {
                let imm = match parse_data(info, tokens[2]) {
                    Some(imm) => imm,
                    None => return,
                };
                Instruction::LoadImm { dst, imm, ty }
            }
        }
        "ret" => Instruction::Return,
        "db_opreg" => Instruction::DebugOutputRegisters,
        _ => {
            info.report_at(CvmError::UnrecognizedInstruction, opcode);
            return;
        }
    };

    match info.current_func_mut() {
        Some(func) => func.instructions.push(inst),
        None => info.report(CvmError::InstructionOutsideFunction),
    }
}

/// Parses a register token.
///
/// `%res` and `%0` are special only as bare tokens; everything else goes
/// through the `%<class><index>[(%<env>)]` scheme.
fn parse_register(info: &mut ParseInfo, word: &str) -> Option<Register> {
    if word == "%res" {
        return Some(Register::Result);
    }
    if word == "%0" {
        return Some(Register::Zero);
    }
    let rest = match word.strip_prefix('%') {
        Some(rest) => rest,
        None => {
            info.report_at(CvmError::UnrecognizedRegister, word);
            return None;
        }
    };

    let (class, rest) = match rest.chars().next() {
        Some('g') => (RegisterClass::Global, &rest[1..]),
        Some('t') => (RegisterClass::Temp, &rest[1..]),
        Some(c) if c.is_ascii_digit() => (RegisterClass::Numeric, rest),
        _ => {
            info.report_at(CvmError::UnrecognizedRegister, word);
            return None;
        }
    };

    let (digits, qualifier) = match rest.find('(') {
        Some(pos) => (&rest[..pos], Some(&rest[pos..])),
        None => (rest, None),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        info.report_at(CvmError::UnrecognizedRegister, word);
        return None;
    }
    let index = match digits.parse::<u16>() {
        Ok(index) => index,
        Err(_) => {
            info.report_at(CvmError::NumberTooLarge, word);
            return None;
        }
    };

    let env = match qualifier {
        None => EnvQualifier::Current,
        Some(tail) => {
            let inner = tail.strip_prefix("(%").and_then(|s| s.strip_suffix(')'));
            match inner {
                Some("env") => EnvQualifier::Current,
                Some("penv") => EnvQualifier::Parent,
                Some("tenv") => EnvQualifier::Temp,
                Some(other) => {
                    info.report_at(CvmError::UnrecognizedEnvironment, other);
                    return None;
                }
                None => {
                    info.report_at(CvmError::UnrecognizedRegister, word);
                    return None;
                }
            }
        }
    };

    Some(Register::Indexed { class, env, index })
}

/// Parses an identifier, resolving `%%` and `%#` escapes.
fn parse_identifier(info: &mut ParseInfo, word: &str) -> Option<String> {
    let mut out = String::with_capacity(word.len());
    let mut escape = false;
    for c in word.chars() {
        if escape {
            escape = false;
            if c == '%' || c == '#' {
                out.push(c);
            } else {
                info.report_at(CvmError::UnrecognizedEscape, word);
                return None;
            }
        } else if c == '%' {
            escape = true;
        } else {
            out.push(c);
        }
    }
    if escape {
        info.report_at(CvmError::UnrecognizedEscape, word);
        return None;
    }
    Some(out)
}

/// Parses an unsigned decimal number.
fn parse_number<T: std::str::FromStr>(info: &mut ParseInfo, word: &str) -> Option<T> {
    match word.parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            if !word.is_empty() && word.bytes().all(|b| b.is_ascii_digit()) {
                info.report_at(CvmError::NumberTooLarge, word);
            } else {
                info.report_at(CvmError::UnrecognizedNumber, word);
            }
            None
        }
    }
}

/// Parses an immediate operand: decimal, or hex with a `0x` prefix.
fn parse_data(info: &mut ParseInfo, word: &str) -> Option<Data> {
    let (digits, radix) = match word.strip_prefix("0x") {
        Some(hex) if word.len() > 2 => (hex, 16),
        _ => (word, 10),
    };
    match u32::from_str_radix(digits, radix) {
        Ok(value) => Some(Data(value)),
        Err(_) => {
            let well_formed = !digits.is_empty()
                && digits
                    .bytes()
                    .all(|b| char::from(b).is_digit(radix));
            if well_formed {
                info.report_at(CvmError::NumberTooLarge, word);
            } else {
                info.report_at(CvmError::UnrecognizedNumber, word);
            }
            eprintln!(
                "The number must be an unsigned integer below {} bits.",
                Data::SIZE * 8
            );
            None
        }
    }
}

/// Parses a `#<index>` data-section reference.
fn parse_data_index(info: &mut ParseInfo, word: &str) -> Option<DataIndex> {
    let digits = match word.strip_prefix('#') {
        Some(digits) => digits,
        None => {
            info.report_at(CvmError::UnrecognizedDataIndex, word);
            return None;
        }
    };
    parse_number::<u32>(info, digits).map(DataIndex)
}

/// Resolves a type name through the registry.
fn parse_type(info: &mut ParseInfo, word: &str) -> Option<TypeIndex> {
    let name = parse_identifier(info, word)?;
    match info.types.find(&name) {
        Some(index) => Some(index),
        None => {
            info.report_at(CvmError::UndefinedType, word);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_register_ok(word: &str) -> Register {
        let mut info = ParseInfo::new();
        let reg = parse_register(&mut info, word);
        assert_eq!(info.errors, 0, "unexpected diagnostics for {word}");
        reg.unwrap()
    }

    fn parse_register_err(word: &str) {
        let mut info = ParseInfo::new();
        assert!(parse_register(&mut info, word).is_none());
        assert_eq!(info.errors, 1);
    }

    #[test]
    fn register_special_tokens() {
        assert_eq!(parse_register_ok("%res"), Register::Result);
        assert_eq!(parse_register_ok("%0"), Register::Zero);
    }

    #[test]
    fn register_numeric_class() {
        assert_eq!(
            parse_register_ok("%5"),
            Register::Indexed {
                class: RegisterClass::Numeric,
                env: EnvQualifier::Current,
                index: 5
            }
        );
        assert_eq!(
            parse_register_ok("%7(%penv)"),
            Register::Indexed {
                class: RegisterClass::Numeric,
                env: EnvQualifier::Parent,
                index: 7
            }
        );
        // Only the bare token is the zero register.
        assert_eq!(
            parse_register_ok("%0(%env)"),
            Register::Indexed {
                class: RegisterClass::Numeric,
                env: EnvQualifier::Current,
                index: 0
            }
        );
    }

    #[test]
    fn register_global_and_temp_classes() {
        assert_eq!(
            parse_register_ok("%g2"),
            Register::Indexed {
                class: RegisterClass::Global,
                env: EnvQualifier::Current,
                index: 2
            }
        );
        assert_eq!(
            parse_register_ok("%t3(%tenv)"),
            Register::Indexed {
                class: RegisterClass::Temp,
                env: EnvQualifier::Temp,
                index: 3
            }
        );
    }

    #[test]
    fn register_malformed_tokens() {
        parse_register_err("r5");
        parse_register_err("%x1");
        parse_register_err("%g");
        parse_register_err("%5(env)");
        parse_register_err("%5(%env");
        parse_register_err("%5(%foo)");
        parse_register_err("%99999");
    }

    #[test]
    fn identifier_escapes() {
        let mut info = ParseInfo::new();
        assert_eq!(parse_identifier(&mut info, "main").unwrap(), "main");
        assert_eq!(parse_identifier(&mut info, "a%%b").unwrap(), "a%b");
        assert_eq!(parse_identifier(&mut info, "a%#b").unwrap(), "a#b");
        assert_eq!(info.errors, 0);

        assert!(parse_identifier(&mut info, "a%zb").is_none());
        assert!(parse_identifier(&mut info, "trailing%").is_none());
        assert_eq!(info.errors, 2);
    }

    #[test]
    fn immediate_bases_and_overflow() {
        let mut info = ParseInfo::new();
        assert_eq!(parse_data(&mut info, "42").unwrap(), Data(42));
        assert_eq!(parse_data(&mut info, "0xDEADBEEF").unwrap(), Data(0xDEADBEEF));
        assert_eq!(info.errors, 0);

        assert!(parse_data(&mut info, "4294967296").is_none()); // u32::MAX + 1
        assert!(parse_data(&mut info, "12ab").is_none());
        assert_eq!(info.errors, 2);
    }

    #[test]
    fn full_program_builds_all_tables() {
        let source = r#"
; a program with every section
.type u32
  size 4
.type marker
  size 0
.datas
  data #1 0xDEADBEEF 4
.program
  entry main
.func main
  arg
  dyvarb 2
  stvarb 2 u32
  load %1, #1, u32
  load %2, 0x2A, u32
  mov %3, %1
  db_opreg
  ret
"#;
        let program = parse_source(source).unwrap();
        assert_eq!(program.entry.as_deref(), Some("main"));
        assert_eq!(program.types.size_of(program.types.find("u32").unwrap()), 4);
        assert_eq!(
            program.types.size_of(program.types.find("marker").unwrap()),
            0
        );
        assert_eq!(program.datas.len(), 1);

        let main = &program.functions["main"];
        assert_eq!(main.dyvarb_count, 2);
        assert_eq!(main.stvarb_typelist.len(), 2);
        assert_eq!(main.instructions.len(), 5);
        assert!(matches!(main.instructions[4], Instruction::Return));
    }

    #[test]
    fn data_blobs_are_little_endian_and_zero_padded() {
        let source = "\
.datas
  data #1 0xDEADBEEF 6
";
        let program = parse_source(source).unwrap();
        let blob = program.datas.get(1).unwrap();
        assert_eq!(blob.bytes(), &[0xEF, 0xBE, 0xAD, 0xDE, 0x00, 0x00]);
    }

    #[test]
    fn data_payload_longer_than_capacity_is_rejected() {
        let source = "\
.datas
  data #1 0xDEADBEEF 3
";
        assert!(matches!(
            parse_source(source),
            Err(CvmError::ParseFailed { count: 1 })
        ));
    }

    #[test]
    fn data_requires_hex_payload() {
        let source = "\
.datas
  data #1 1234 4
";
        assert!(matches!(
            parse_source(source),
            Err(CvmError::ParseFailed { count: 1 })
        ));
    }

    #[test]
    fn duplicate_declarations_are_reported() {
        let source = "\
.type u32
  size 4
.type u32
  size 8
";
        assert!(matches!(
            parse_source(source),
            Err(CvmError::ParseFailed { count: 1 })
        ));

        let source = "\
.func main
  ret
.func main
  ret
";
        assert!(matches!(
            parse_source(source),
            Err(CvmError::ParseFailed { count: 1 })
        ));

        let source = "\
.datas
  data #1 0x00 1
  data #1 0x01 1
";
        assert!(matches!(
            parse_source(source),
            Err(CvmError::ParseFailed { count: 1 })
        ));
    }

    #[test]
    fn parsing_continues_after_an_error() {
        let source = "\
.func main
  bogus_op
  load %1, 42, nosuchtype
  ret
";
        assert!(matches!(
            parse_source(source),
            Err(CvmError::ParseFailed { count: 2 })
        ));
    }

    #[test]
    fn reserved_sections_accept_no_directives() {
        let source = "\
.imports
  import foo
";
        assert!(matches!(
            parse_source(source),
            Err(CvmError::ParseFailed { count: 1 })
        ));

        // The headers alone are fine.
        let source = ".imports\n.exports\n.module\n";
        assert!(parse_source(source).is_ok());
    }

    #[test]
    fn instruction_outside_function_is_rejected() {
        let source = "  ret\n";
        assert!(matches!(
            parse_source(source),
            Err(CvmError::ParseFailed { count: 1 })
        ));
    }

    #[test]
    fn reserved_func_directives_are_noops() {
        let source = "\
.func main
  arg
  .data
  ret
";
        let program = parse_source(source).unwrap();
        assert_eq!(program.functions["main"].instructions.len(), 1);
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let source = "\n; only comments\n\n   ; indented comment\n";
        let program = parse_source(source).unwrap();
        assert!(program.functions.is_empty());
        assert!(program.entry.is_none());
    }

    #[test]
    fn unindented_garbage_is_a_parse_error() {
        assert!(matches!(
            parse_source("garbage line\n"),
            Err(CvmError::ParseFailed { count: 1 })
        ));
    }
}
