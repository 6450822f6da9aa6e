//! Content blocks and the taint DAG.
//!
//! Every piece of text that crosses a trust boundary becomes a block with an
//! id, a trust level, and its parent blocks. Blocks form a DAG, never a
//! cycle: a block can only name already-existing blocks as parents. Trust
//! propagates worst-of-parents; only a security supervisor re-classifies.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;

/// Trust level of a content block, ordered best → worst.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trust {
    Trusted,
    Vetted,
    Untrusted,
}

impl Trust {
    fn rank(self) -> u8 {
        match self {
            Self::Trusted => 0,
            Self::Vetted => 1,
            Self::Untrusted => 2,
        }
    }

    /// The worse (less trusted) of two levels.
    pub fn worst(self, other: Self) -> Self {
        if self.rank() >= other.rank() {
            self
        } else {
            other
        }
    }

    /// `self` is at most as trusted as `other`.
    pub fn at_most(self, other: Self) -> bool {
        self.rank() >= other.rank()
    }
}

impl std::fmt::Display for Trust {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trusted => write!(f, "trusted"),
            Self::Vetted => write!(f, "vetted"),
            Self::Untrusted => write!(f, "untrusted"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockType {
    Instruction,
    Data,
}

#[derive(Clone, Debug)]
pub struct ContentBlock {
    pub id: String,
    pub trust: Trust,
    pub block_type: BlockType,
    pub source: String,
    pub entropy: f64,
    pub parents: Vec<String>,
    pub content: String,
}

/// Shannon entropy of a byte string, in bits per byte.
pub fn shannon_entropy(data: &str) -> f64 {
    let bytes = data.as_bytes();
    if bytes.is_empty() {
        return 0.0;
    }
    let mut counts = [0usize; 256];
    for b in bytes {
        counts[*b as usize] += 1;
    }
    let len = bytes.len() as f64;
    counts
        .iter()
        .filter(|c| **c > 0)
        .map(|c| {
            let p = *c as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Arena of content blocks, keyed by id. Ids are handed across task
/// boundaries; the blocks themselves stay here.
#[derive(Default)]
pub struct BlockArena {
    blocks: HashMap<String, ContentBlock>,
    counter: u64,
}

impl BlockArena {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&mut self) -> String {
        self.counter += 1;
        format!("b{:04}", self.counter)
    }

    /// Insert a root block with intrinsic trust.
    pub fn insert(
        &mut self,
        trust: Trust,
        block_type: BlockType,
        source: impl Into<String>,
        content: impl Into<String>,
    ) -> String {
        let content = content.into();
        let id = self.next_id();
        self.blocks.insert(
            id.clone(),
            ContentBlock {
                id: id.clone(),
                trust,
                block_type,
                source: source.into(),
                entropy: shannon_entropy(&content),
                parents: Vec::new(),
                content,
            },
        );
        id
    }

    /// Derive a block from existing parents. Trust is the worst of the
    /// parents' trust and the new source's intrinsic trust. Unknown parent
    /// ids are ignored (the payload still carries the intrinsic trust).
    pub fn derive(
        &mut self,
        intrinsic: Trust,
        block_type: BlockType,
        source: impl Into<String>,
        content: impl Into<String>,
        parents: &[String],
    ) -> String {
        let content = content.into();
        let mut trust = intrinsic;
        for p in parents {
            if let Some(parent) = self.blocks.get(p) {
                trust = trust.worst(parent.trust);
            }
        }
        let id = self.next_id();
        self.blocks.insert(
            id.clone(),
            ContentBlock {
                id: id.clone(),
                trust,
                block_type,
                source: source.into(),
                entropy: shannon_entropy(&content),
                parents: parents.to_vec(),
                content,
            },
        );
        id
    }

    pub fn get(&self, id: &str) -> Option<&ContentBlock> {
        self.blocks.get(id)
    }

    /// Supervisor re-classification — the only way trust ever improves.
    pub fn reclassify(&mut self, id: &str, trust: Trust) {
        if let Some(block) = self.blocks.get_mut(id) {
            block.trust = trust;
        }
    }

    /// Resolve the parent DAG of `id` into the tree emitted as
    /// `meta.taint_lineage`. Shared ancestors repeat in the tree; content is
    /// reduced to a short preview.
    pub fn lineage(&self, id: &str) -> Value {
        let Some(block) = self.blocks.get(id) else {
            return Value::Null;
        };
        let parents: Vec<Value> = block.parents.iter().map(|p| self.lineage(p)).collect();
        json!({
            "block_id": block.id,
            "trust": block.trust,
            "block_type": block.block_type,
            "source": block.source,
            "entropy": (block.entropy * 100.0).round() / 100.0,
            "preview": preview(&block.content),
            "parents": parents,
        })
    }
}

fn preview(content: &str) -> String {
    let trimmed: String = content.chars().take(80).collect();
    if trimmed.len() < content.len() {
        format!("{}…", trimmed)
    } else {
        trimmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entropy_of_uniform_text_is_low() {
        assert_eq!(shannon_entropy(""), 0.0);
        assert_eq!(shannon_entropy("aaaa"), 0.0);
        let english = shannon_entropy("the quick brown fox jumps over the lazy dog");
        assert!(english > 3.0 && english < 5.0, "got {}", english);
    }

    #[test]
    fn entropy_of_random_bytes_is_high() {
        let noisy = "k9Xq2Lm8Zp4Rv7Tw1Yc5Bn3Hd6Jf0Gs9Ak2Qx8Wz4Me7Ur1Io5Pl3";
        assert!(shannon_entropy(noisy) > 4.5);
    }

    #[test]
    fn ids_are_sequential() {
        let mut arena = BlockArena::new();
        let a = arena.insert(Trust::Trusted, BlockType::Instruction, "goal", "do x");
        let b = arena.insert(Trust::Untrusted, BlockType::Data, "web", "payload");
        assert_eq!(a, "b0001");
        assert_eq!(b, "b0002");
    }

    #[test]
    fn derived_trust_is_worst_of_parents() {
        let mut arena = BlockArena::new();
        let trusted = arena.insert(Trust::Trusted, BlockType::Instruction, "goal", "x");
        let untrusted = arena.insert(Trust::Untrusted, BlockType::Data, "web", "y");
        let child = arena.derive(
            Trust::Trusted,
            BlockType::Data,
            "concat",
            "xy",
            &[trusted.clone(), untrusted.clone()],
        );
        assert_eq!(arena.get(&child).unwrap().trust, Trust::Untrusted);

        let clean = arena.derive(Trust::Vetted, BlockType::Data, "summary", "z", &[trusted]);
        assert_eq!(arena.get(&clean).unwrap().trust, Trust::Vetted);
    }

    #[test]
    fn taint_monotonicity_holds_without_reclassification() {
        let mut arena = BlockArena::new();
        let p = arena.insert(Trust::Untrusted, BlockType::Data, "web", "a");
        let c = arena.derive(Trust::Trusted, BlockType::Data, "derived", "b", &[p.clone()]);
        let parent_trust = arena.get(&p).unwrap().trust;
        let child_trust = arena.get(&c).unwrap().trust;
        assert!(child_trust.at_most(parent_trust));
    }

    #[test]
    fn reclassify_lifts_trust() {
        let mut arena = BlockArena::new();
        let id = arena.insert(Trust::Untrusted, BlockType::Data, "web", "payload");
        arena.reclassify(&id, Trust::Vetted);
        assert_eq!(arena.get(&id).unwrap().trust, Trust::Vetted);
    }

    #[test]
    fn lineage_resolves_to_tree() {
        let mut arena = BlockArena::new();
        let root = arena.insert(Trust::Untrusted, BlockType::Data, "web fetch", "raw html");
        let child = arena.derive(
            Trust::Trusted,
            BlockType::Data,
            "summarizer",
            "summary",
            &[root],
        );
        let tree = arena.lineage(&child);
        assert_eq!(tree["block_id"], "b0002");
        assert_eq!(tree["trust"], "untrusted");
        assert_eq!(tree["parents"][0]["block_id"], "b0001");
        assert_eq!(tree["parents"][0]["source"], "web fetch");
    }

    #[test]
    fn worst_ordering() {
        assert_eq!(Trust::Trusted.worst(Trust::Untrusted), Trust::Untrusted);
        assert_eq!(Trust::Vetted.worst(Trust::Trusted), Trust::Vetted);
        assert_eq!(Trust::Trusted.worst(Trust::Trusted), Trust::Trusted);
    }
}
