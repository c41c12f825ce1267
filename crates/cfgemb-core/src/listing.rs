//! Textual disassembly listing -> CFG extraction.
//!
//! The disassembler capability emits one line per instruction in the form
//! `SEGMENT:ADDRESS <byte pairs> <mnemonic> [operands] [; comment]`, for
//! example:
//!
//! ```text
//! .text:00401000 55          push    ebp
//! .text:00401001 8B EC       mov     ebp, esp
//! .text:00401003 75 04       jnz     short loc_401009
//! ```
//!
//! Basic blocks are formed in the usual way: leaders are the first
//! instruction, every branch target, and the instruction after a control
//! transfer. Block keys and successor addresses use decimal strings, the
//! interchange contract consumed by the graph builder. Branch targets that
//! do not resolve to an instruction in the listing simply produce no edge.

use std::collections::BTreeSet;

use smallvec::SmallVec;

use crate::cfg::{Block, Cfg, Instruction};
use crate::error::ListingError;

struct Line {
    addr: u64,
    insn: Instruction,
}

/// Parses a full listing into the CFG interchange mapping.
pub fn parse_listing(text: &str) -> Result<Cfg, ListingError> {
    let lines: Vec<Line> = text.lines().filter_map(parse_line).collect();
    if lines.is_empty() {
        return Err(ListingError::NoInstructions);
    }

    let known: BTreeSet<u64> = lines.iter().map(|l| l.addr).collect();

    // Leaders: first instruction, branch targets inside the listing, and the
    // instruction following any terminator.
    let mut leaders = BTreeSet::new();
    leaders.insert(lines[0].addr);
    for (i, line) in lines.iter().enumerate() {
        if let Some(target) = branch_target(&line.insn) {
            if known.contains(&target) {
                leaders.insert(target);
            }
        }
        if is_terminator(&line.insn.opcode) {
            if let Some(next) = lines.get(i + 1) {
                leaders.insert(next.addr);
            }
        }
    }

    let mut cfg = Cfg::new();
    let mut current_start: Option<u64> = None;
    let mut current_insns: Vec<Instruction> = Vec::new();

    let flush = |cfg: &mut Cfg, start: u64, insns: &mut Vec<Instruction>, next_addr: Option<u64>| {
        let last = insns.last().cloned();
        let mut out: Vec<String> = Vec::new();
        if let Some(last) = last {
            if let Some(target) = branch_target(&last) {
                if known.contains(&target) {
                    out.push(target.to_string());
                }
            }
            // Fall-through successor: conditional jumps and plain block
            // splits continue to the next instruction; jmp and returns don't.
            let falls_through = !matches!(last.opcode.as_str(), "jmp" | "ret" | "retn" | "retf");
            if falls_through {
                if let Some(next) = next_addr {
                    out.push(next.to_string());
                }
            }
        }
        cfg.insert(
            start.to_string(),
            Block {
                insn_list: std::mem::take(insns),
                out_edge_list: out,
            },
        );
    };

    for line in &lines {
        if leaders.contains(&line.addr) {
            if let Some(start) = current_start {
                flush(&mut cfg, start, &mut current_insns, Some(line.addr));
            }
            current_start = Some(line.addr);
        }
        current_insns.push(line.insn.clone());
    }
    if let Some(start) = current_start {
        flush(&mut cfg, start, &mut current_insns, None);
    }

    Ok(cfg)
}

/// Parses one listing line into `(address, instruction)`. Lines that do not
/// carry a `SEG:ADDR` prefix or an instruction (blank lines, directives) are
/// skipped.
fn parse_line(line: &str) -> Option<Line> {
    let line = line.split(';').next().unwrap_or_default().trim();
    if line.is_empty() {
        return None;
    }

    let mut tokens = line.split_whitespace();
    let location = tokens.next()?;
    let (_, addr_hex) = location.rsplit_once(':')?;
    let addr = u64::from_str_radix(addr_hex, 16).ok()?;

    // Skip the raw byte pairs between the address and the mnemonic.
    let mut rest: Vec<&str> = tokens.collect();
    let first_non_byte = rest.iter().position(|t| !is_byte_pair(t))?;
    rest.drain(..first_non_byte);

    let opcode = rest.first()?.to_lowercase();
    let operand_text = rest[1..].join(" ");
    let operands: SmallVec<[String; 4]> = operand_text
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect();

    Some(Line {
        addr,
        insn: Instruction { opcode, operands },
    })
}

fn is_byte_pair(token: &str) -> bool {
    token.len() == 2 && token.chars().all(|c| c.is_ascii_hexdigit())
}

fn is_terminator(opcode: &str) -> bool {
    matches!(opcode, "jmp" | "ret" | "retn" | "retf") || is_conditional_jump(opcode)
}

fn is_conditional_jump(opcode: &str) -> bool {
    opcode != "jmp" && opcode.starts_with('j')
}

/// Extracts a branch target address from a jump instruction's first operand.
/// Handles `loc_`/`sub_`-style labels (possibly with a `short`/`near`
/// distance prefix), `h`-suffixed hex, and `0x` literals.
fn branch_target(insn: &Instruction) -> Option<u64> {
    if !(insn.opcode == "jmp" || is_conditional_jump(&insn.opcode)) {
        return None;
    }
    let operand = insn.operands.first()?;
    for word in operand.split_whitespace() {
        if let Some((_, hex)) = word.rsplit_once('_') {
            if let Ok(addr) = u64::from_str_radix(hex, 16) {
                return Some(addr);
            }
        }
        if let Some(body) = word.strip_suffix('h') {
            if let Ok(addr) = u64::from_str_radix(body, 16) {
                return Some(addr);
            }
        }
        if let Some(body) = word.strip_prefix("0x") {
            if let Ok(addr) = u64::from_str_radix(body, 16) {
                return Some(addr);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "\
.text:00401000 55             push    ebp
.text:00401001 8B EC          mov     ebp, esp
.text:00401003 75 04          jnz     short loc_401009
.text:00401005 33 C0          xor     eax, eax
.text:00401007 EB 02          jmp     short loc_40100B
.text:00401009 B8 01 00 00 00 mov     eax, 1
.text:0040100B 5D             pop     ebp ; restore frame
.text:0040100C C3             retn
";

    #[test]
    fn splits_blocks_at_leaders() {
        let cfg = parse_listing(LISTING).unwrap();
        // Leaders: 0x401000 (entry), 0x401005 (after jnz), 0x401009 (target),
        // 0x40100B (target, after mov fallthrough block).
        let keys: Vec<&String> = cfg.keys().collect();
        assert_eq!(
            keys,
            [
                &0x401000u64.to_string(),
                &0x401005u64.to_string(),
                &0x401009u64.to_string(),
                &0x40100Bu64.to_string()
            ]
        );
        assert_eq!(cfg[&0x401000u64.to_string()].insn_list.len(), 3);
    }

    #[test]
    fn conditional_jump_has_target_and_fallthrough() {
        let cfg = parse_listing(LISTING).unwrap();
        let entry = &cfg[&0x401000u64.to_string()];
        assert_eq!(
            entry.out_edge_list,
            vec![0x401009u64.to_string(), 0x401005u64.to_string()]
        );
    }

    #[test]
    fn unconditional_jump_has_single_edge_and_ret_none() {
        let cfg = parse_listing(LISTING).unwrap();
        let jmp_block = &cfg[&0x401005u64.to_string()];
        assert_eq!(jmp_block.out_edge_list, vec![0x40100Bu64.to_string()]);

        let ret_block = &cfg[&0x40100Bu64.to_string()];
        assert!(ret_block.out_edge_list.is_empty());
    }

    #[test]
    fn fallthrough_edge_when_block_split_by_leader() {
        let cfg = parse_listing(LISTING).unwrap();
        // Block at 0x401009 ends with a plain mov and falls into 0x40100B.
        let block = &cfg[&0x401009u64.to_string()];
        assert_eq!(block.out_edge_list, vec![0x40100Bu64.to_string()]);
    }

    #[test]
    fn target_outside_listing_produces_no_edge() {
        let text = "\
.text:00401000 EB 10 jmp short loc_409999
.text:00401002 C3    retn
";
        let cfg = parse_listing(text).unwrap();
        assert!(cfg[&0x401000u64.to_string()].out_edge_list.is_empty());
    }

    #[test]
    fn comments_and_blank_lines_are_ignored() {
        let text = "\
; segment header

.text:00401000 90 nop
.text:00401001 C3 retn
";
        let cfg = parse_listing(text).unwrap();
        assert_eq!(cfg.len(), 1);
        assert_eq!(cfg[&0x401000u64.to_string()].insn_list.len(), 2);
    }

    #[test]
    fn empty_listing_is_an_error() {
        assert!(matches!(
            parse_listing("; nothing here\n"),
            Err(ListingError::NoInstructions)
        ));
    }

    #[test]
    fn operands_are_split_on_commas() {
        let cfg = parse_listing(LISTING).unwrap();
        let entry = &cfg[&0x401000u64.to_string()];
        let mov = &entry.insn_list[1];
        assert_eq!(mov.opcode, "mov");
        assert_eq!(mov.operands.as_slice(), ["ebp".to_string(), "esp".to_string()]);
    }
}
