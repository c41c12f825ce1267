//! Instruction normalization for the embedding encoder.
//!
//! Converts a raw (opcode, operands) pair into a canonical token string. Two
//! separator conventions exist because the CFG side and the encoder input use
//! different ones: [`NormMode::Underscore`] joins with `_` and keeps unknown
//! operands verbatim, [`NormMode::Comma`] joins with `,` and collapses
//! unknown operands to generic markers.
//!
//! Pointer canonicalization ([`handle_ptr`]) reproduces the offset banding of
//! the canonical disassembler format bit-for-bit; the ±10 boundaries are part
//! of the format and existing corpora depend on them.

use std::collections::HashSet;

/// Register names kept verbatim during normalization.
const REGS: &[&str] = &[
    // 64-bit
    "rax", "rbx", "rcx", "rdx", "rsi", "rdi", "rbp", "rsp", "r8", "r9", "r10", "r11", "r12",
    "r13", "r14", "r15", // 32-bit
    "eax", "ebx", "ecx", "edx", "esi", "edi", "ebp", "esp", "r8d", "r9d", "r10d", "r11d",
    "r12d", "r13d", "r14d", "r15d", // 16-bit
    "ax", "bx", "cx", "dx", "si", "di", "bp", "sp", // 8-bit
    "al", "ah", "bl", "bh", "cl", "ch", "dl", "dh", "sil", "dil", "bpl", "spl",
    // segments
    "cs", "ds", "es", "fs", "gs", "ss", // simd / fpu
    "xmm0", "xmm1", "xmm2", "xmm3", "xmm4", "xmm5", "xmm6", "xmm7", "mm0", "mm1", "mm2",
    "mm3", "mm4", "mm5", "mm6", "mm7", "st",
];

/// Type keywords dropped during normalization (they carry no semantics the
/// encoder needs).
const TYPES: &[&str] = &[
    "byte", "word", "dword", "qword", "tbyte", "xmmword", "ymmword", "zmmword", "ptr", "short",
    "near", "far", "small", "large", "offset",
];

/// Separator and marker convention for [`normalize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormMode {
    /// `_`-separated; immediates become `IMM`, `ds:`/underscore operands
    /// become `MEM`, unknown operands are kept verbatim.
    Underscore,
    /// `,`-separated encoder convention; immediates become `addr`, unknown
    /// operands become `string`.
    Comma,
}

fn is_register(operand: &str) -> bool {
    REGS.contains(&operand)
}

fn is_type_keyword(operand: &str) -> bool {
    TYPES.contains(&operand)
}

/// Plain decimal, or hex with a trailing `h` (disassembler convention).
fn is_immediate(operand: &str) -> bool {
    let decimal = !operand.is_empty() && operand.chars().all(|c| c.is_ascii_digit());
    decimal || operand.ends_with('h')
}

/// Produces the canonical token string for one instruction.
///
/// `call` collapses to the single token `call` regardless of operands: call
/// targets are not embedded individually.
pub fn normalize(opcode: &str, operands: &[String], mode: NormMode) -> String {
    if opcode == "call" {
        return "call".to_string();
    }

    let sep = match mode {
        NormMode::Underscore => '_',
        NormMode::Comma => ',',
    };

    let mut out = opcode.to_string();
    for operand in operands {
        let operand = operand.as_str();
        if is_register(operand) {
            out.push(sep);
            out.push_str(operand);
        } else if operand.starts_with('[') && operand.ends_with(']') {
            out.push(sep);
            out.push_str(&handle_ptr(operand));
        } else if mode == NormMode::Underscore
            && (operand.starts_with("ds:") || operand.contains('_'))
        {
            out.push_str("_MEM");
        } else if is_immediate(operand) {
            out.push(sep);
            out.push_str(match mode {
                NormMode::Underscore => "IMM",
                NormMode::Comma => "addr",
            });
        } else if is_type_keyword(operand) {
            continue;
        } else {
            out.push(sep);
            match mode {
                NormMode::Underscore => out.push_str(operand),
                NormMode::Comma => out.push_str("string"),
            }
        }
    }
    out
}

/// Numeric value of a pointer term: plain decimal, or hex with trailing `h`.
fn term_value(item: &str) -> Option<i64> {
    if !item.is_empty() && item.chars().all(|c| c.is_ascii_digit()) {
        return item.parse().ok();
    }
    item.strip_suffix('h')
        .and_then(|body| i64::from_str_radix(body, 16).ok())
}

/// Canonicalizes a bracketed memory operand such as `[ebp-1Ch]`,
/// `[esp+40h+-18h]`, or `[ebp+esp*4]`.
///
/// Scans left to right splitting on `+`, `-`, and `]`, folding every numeric
/// term into a running signed accumulator (`+-` is pre-normalized to `-`; a
/// numeric first term with no preceding operator contributes nothing).
/// Symbolic terms are emitted verbatim with their operator. The accumulator
/// is then rendered with the exact offset banding of the disassembler format.
pub fn handle_ptr(ptr: &str) -> String {
    let ptr = ptr.replace("+-", "-");

    let mut out = String::from("[");
    let mut item = String::new();
    let mut count: i64 = 0;
    let mut operator: Option<char> = None;

    for ch in ptr.chars().skip(1) {
        if ch == '+' || ch == '-' || ch == ']' {
            match term_value(&item) {
                Some(value) => match operator {
                    Some('+') => count += value,
                    Some('-') => count -= value,
                    _ => {}
                },
                None => {
                    if let Some(op) = operator {
                        out.push(op);
                    }
                    out.push_str(&item);
                }
            }
            operator = if ch == ']' { None } else { Some(ch) };
            item.clear();
        } else {
            item.push(ch);
        }
    }

    render_offset(count, &mut out);
    out
}

/// Appends the banded offset rendering. The ±10 boundaries are an exact
/// compatibility contract with existing corpora.
fn render_offset(count: i64, out: &mut String) {
    if count <= -10 {
        out.push_str(&format!("-{:X}h]", -count));
    } else if count < 0 {
        out.push_str(&format!("-{:X}]", -count));
    } else if count == 0 {
        out.push(']');
    } else if count < 10 {
        out.push_str(&format!("+{:X}]", count));
    } else {
        out.push_str(&format!("+{:X}h]", count));
    }
}

/// Splits a normalized instruction into space-separated encoder tokens.
///
/// The first whitespace run is treated as the opcode/operand separator, then
/// each comma-separated operand is split into alphanumeric runs. A `0x…`
/// token of length ≥ 6 is classified against the optional symbol and string
/// tables from the disassembler boundary: `symbol` if its value is a known
/// symbol, `string` if a known string, otherwise `address`. With no tables
/// every such token resolves to `address`.
pub fn tokenize_for_encoder(
    ins: &str,
    symbols: Option<&HashSet<u64>>,
    strings: Option<&HashSet<u64>>,
) -> String {
    let ins = replace_first_whitespace(ins);
    let mut parts = ins.split(',');
    let opcode = parts.next().unwrap_or_default();

    let mut tokens: Vec<String> = vec![opcode.to_string()];
    for operand in parts {
        for token in split_alnum_runs(operand) {
            tokens.push(classify_token(token, symbols, strings));
        }
    }
    tokens.join(" ")
}

fn classify_token(
    token: String,
    symbols: Option<&HashSet<u64>>,
    strings: Option<&HashSet<u64>>,
) -> String {
    if token.len() >= 6 && token.starts_with("0x") {
        if let Ok(value) = u64::from_str_radix(&token[2..], 16) {
            if symbols.is_some_and(|table| table.contains(&value)) {
                return "symbol".to_string();
            }
            if strings.is_some_and(|table| table.contains(&value)) {
                return "string".to_string();
            }
            return "address".to_string();
        }
    }
    token
}

fn replace_first_whitespace(ins: &str) -> String {
    match ins.find(char::is_whitespace) {
        Some(start) => {
            let rest = ins[start..].trim_start();
            format!("{},{}", &ins[..start], rest)
        }
        None => ins.to_string(),
    }
}

/// Splits into maximal alphanumeric runs and single punctuation runs,
/// discarding whitespace: `[ebp+8]` -> `[`, `ebp`, `+`, `8`, `]`.
fn split_alnum_runs(operand: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut current_alnum = false;

    for ch in operand.chars() {
        let alnum = ch.is_ascii_alphanumeric();
        if !current.is_empty() && alnum != current_alnum {
            push_run(&mut tokens, &current, current_alnum);
            current.clear();
        }
        current.push(ch);
        current_alnum = alnum;
    }
    if !current.is_empty() {
        push_run(&mut tokens, &current, current_alnum);
    }
    tokens
}

fn push_run(tokens: &mut Vec<String>, run: &str, alnum: bool) {
    if alnum {
        tokens.push(run.to_string());
    } else {
        // Punctuation runs may embed whitespace; split it away.
        tokens.extend(run.split_whitespace().map(|s| s.to_string()));
    }
}
