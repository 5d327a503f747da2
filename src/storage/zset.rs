use super::avl::{self, Ranked, TreeLink};
use super::hash::str_hash;
use super::hash_index::{HashIndex, HashLink, Hashed, IndexPolicy};
use slab::Slab;
use std::cmp::Ordering;

/// Stable handle to a member of one [`SortedSet`]
pub type MemberId = usize;

/// One sorted-set member, linked into the name index and the score tree at once.
#[derive(Debug)]
pub struct ZNode {
    hash: HashLink,
    tree: TreeLink,
    score: f64,
    name: Box<[u8]>,
}

impl ZNode {
    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn name(&self) -> &[u8] {
        &self.name
    }
}

impl Hashed for ZNode {
    fn hash_link(&self) -> &HashLink {
        &self.hash
    }

    fn hash_link_mut(&mut self) -> &mut HashLink {
        &mut self.hash
    }
}

impl Ranked for ZNode {
    fn tree_link(&self) -> &TreeLink {
        &self.tree
    }

    fn tree_link_mut(&mut self) -> &mut TreeLink {
        &mut self.tree
    }
}

/// Total order over (score, name), name compared bytewise
fn cmp_key(score: f64, name: &[u8], other_score: f64, other_name: &[u8]) -> Ordering {
    score
        .total_cmp(&other_score)
        .then_with(|| name.cmp(other_name))
}

fn znode_cmp(a: &ZNode, b: &ZNode) -> Ordering {
    cmp_key(a.score, &a.name, b.score, &b.name)
}

/// Result of [`SortedSet::insert`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The name was new
    Inserted,
    /// The name existed and its score moved
    Updated,
    /// The name existed with the same score
    Unchanged,
}

/// Sorted set: O(1) membership by name plus ordered, positional access by score.
#[derive(Debug, Default)]
pub struct SortedSet {
    nodes: Slab<ZNode>,
    index: HashIndex,
    root: Option<usize>,
}

impl SortedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: IndexPolicy) -> Self {
        Self {
            nodes: Slab::new(),
            index: HashIndex::with_policy(policy),
            root: None,
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add `name` or move it to `score`.
    ///
    /// An existing member keeps its allocation and its [`MemberId`].
    pub fn insert(&mut self, name: &[u8], score: f64) -> InsertOutcome {
        if let Some(id) = self.lookup(name) {
            if self.nodes[id].score == score {
                return InsertOutcome::Unchanged;
            }
            self.root = avl::delete(&mut self.nodes, id);
            self.nodes[id].score = score;
            self.root = Some(avl::insert(&mut self.nodes, self.root, id, znode_cmp));
            return InsertOutcome::Updated;
        }

        let id = self.nodes.insert(ZNode {
            hash: HashLink::new(str_hash(name)),
            tree: TreeLink::new(),
            score,
            name: name.into(),
        });
        self.index.insert(&mut self.nodes, id);
        self.root = Some(avl::insert(&mut self.nodes, self.root, id, znode_cmp));
        InsertOutcome::Inserted
    }

    pub fn lookup(&self, name: &[u8]) -> Option<MemberId> {
        self.index
            .lookup(&self.nodes, str_hash(name), |node| &*node.name == name)
    }

    /// Remove a member previously returned by this set.
    pub fn delete(&mut self, id: MemberId) -> ZNode {
        self.root = avl::delete(&mut self.nodes, id);
        self.index.remove_node(&mut self.nodes, id);
        self.nodes.remove(id)
    }

    pub fn get(&self, id: MemberId) -> &ZNode {
        &self.nodes[id]
    }

    /// Smallest member that is not less than `(score, name)`.
    pub fn seek_ge(&self, score: f64, name: &[u8]) -> Option<MemberId> {
        let mut best = None;
        let mut cur = self.root;
        while let Some(id) = cur {
            let node = &self.nodes[id];
            match cmp_key(node.score, &node.name, score, name) {
                Ordering::Equal => return Some(id),
                Ordering::Less => cur = node.tree.right(),
                Ordering::Greater => {
                    best = Some(id);
                    cur = node.tree.left();
                }
            }
        }
        best
    }

    /// Member `k` positions after (or before, if negative) `id` in order.
    pub fn offset(&self, id: MemberId, k: i64) -> Option<MemberId> {
        avl::offset(&self.nodes, id, k)
    }

    /// Zero-based position of `id` in (score, name) order.
    pub fn rank(&self, id: MemberId) -> usize {
        avl::rank(&self.nodes, id)
    }

    pub fn first(&self) -> Option<MemberId> {
        avl::first(&self.nodes, self.root)
    }

    /// Destroy every member.
    pub fn clear(&mut self) {
        self.root = None;
        self.index.clear();
        self.nodes.clear();
    }

    /// Walk members in order starting at `start`, at most `limit` of them.
    pub fn range(&self, start: Option<MemberId>, limit: usize) -> Range<'_> {
        Range {
            set: self,
            cur: start,
            remaining: limit,
        }
    }
}

/// In-order walk produced by [`SortedSet::range`]
pub struct Range<'a> {
    set: &'a SortedSet,
    cur: Option<MemberId>,
    remaining: usize,
}

impl<'a> Iterator for Range<'a> {
    type Item = &'a ZNode;

    fn next(&mut self) -> Option<&'a ZNode> {
        if self.remaining == 0 {
            return None;
        }
        let id = self.cur?;
        self.remaining -= 1;
        self.cur = self.set.offset(id, 1);
        Some(self.set.get(id))
    }
}
