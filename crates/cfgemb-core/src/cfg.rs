//! CFG interchange types.
//!
//! The interchange format is a JSON object mapping block addresses to basic
//! blocks (`{"<address>": {"insn_list": [...], "out_edge_list": [...]}}`).
//! The mapping is deserialized into an [`IndexMap`] so that document order is
//! preserved: node-id assignment is defined by this iteration order and is
//! never re-derived from edges.

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use smallvec::SmallVec;

/// A single disassembled instruction: mnemonic plus ordered operand strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub opcode: String,
    pub operands: SmallVec<[String; 4]>,
}

impl Instruction {
    pub fn new(opcode: impl Into<String>, operands: &[&str]) -> Self {
        Instruction {
            opcode: opcode.into(),
            operands: operands.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// A basic block: a straight-line instruction run plus successor addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub insn_list: Vec<Instruction>,
    /// Successor addresses. Producers sometimes emit these as JSON numbers,
    /// so deserialization accepts either form and canonicalizes to the
    /// decimal string used as the block key.
    #[serde(deserialize_with = "deserialize_addr_list")]
    pub out_edge_list: Vec<String>,
}

/// A control-flow graph: block address -> basic block, in document order.
pub type Cfg = IndexMap<String, Block>;

/// Parses a CFG from its JSON interchange form.
pub fn parse_cfg(json: &str) -> Result<Cfg, serde_json::Error> {
    serde_json::from_str(json)
}

fn deserialize_addr_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Addr {
        Num(u64),
        Str(String),
    }

    let raw = Vec::<Addr>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|addr| match addr {
            Addr::Num(n) => n.to_string(),
            Addr::Str(s) => s,
        })
        .collect())
}
