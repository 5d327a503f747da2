//! Rank-augmented AVL tree over slab-allocated records.
//!
//! Every node caches its height and subtree size, so besides the usual
//! ordered insert/delete the tree answers positional queries (`offset`,
//! `rank`) in O(log n). Nodes are addressed by slab key; the tree never
//! owns the records it links together.
//!
//! Operations on a well-formed tree are total. Passing a key that is not
//! linked into the tree rooted where the caller thinks it is, or a
//! different arena than the one the tree was built in, is a caller bug.

use slab::Slab;
use std::cmp::Ordering;

/// Tree link embedded in every record that lives in a rank tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeLink {
    parent: Option<usize>,
    left: Option<usize>,
    right: Option<usize>,
    height: u32,
    size: usize,
}

impl TreeLink {
    /// A detached single-node link
    pub fn new() -> Self {
        Self {
            parent: None,
            left: None,
            right: None,
            height: 1,
            size: 1,
        }
    }

    pub fn parent(&self) -> Option<usize> {
        self.parent
    }

    pub fn left(&self) -> Option<usize> {
        self.left
    }

    pub fn right(&self) -> Option<usize> {
        self.right
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Node count of the subtree rooted here, this node included
    pub fn size(&self) -> usize {
        self.size
    }
}

impl Default for TreeLink {
    fn default() -> Self {
        Self::new()
    }
}

/// Access to the [`TreeLink`] embedded in a record.
pub trait Ranked {
    fn tree_link(&self) -> &TreeLink;
    fn tree_link_mut(&mut self) -> &mut TreeLink;
}

#[inline]
fn link<T: Ranked>(nodes: &Slab<T>, id: usize) -> &TreeLink {
    nodes[id].tree_link()
}

#[inline]
fn link_mut<T: Ranked>(nodes: &mut Slab<T>, id: usize) -> &mut TreeLink {
    nodes[id].tree_link_mut()
}

#[inline]
fn height<T: Ranked>(nodes: &Slab<T>, id: Option<usize>) -> u32 {
    id.map_or(0, |id| link(nodes, id).height)
}

/// Subtree size of an optional node, zero for an empty subtree.
#[inline]
pub fn size<T: Ranked>(nodes: &Slab<T>, id: Option<usize>) -> usize {
    id.map_or(0, |id| link(nodes, id).size)
}

fn update<T: Ranked>(nodes: &mut Slab<T>, id: usize) {
    let (left, right) = {
        let l = link(nodes, id);
        (l.left, l.right)
    };
    let h = 1 + height(nodes, left).max(height(nodes, right));
    let s = 1 + size(nodes, left) + size(nodes, right);
    let l = link_mut(nodes, id);
    l.height = h;
    l.size = s;
}

// Rotations leave the parent's child pointer alone; `fix` patches it.
fn rot_left<T: Ranked>(nodes: &mut Slab<T>, node: usize) -> usize {
    let parent = link(nodes, node).parent;
    let new_node = link(nodes, node)
        .right
        .expect("rot_left requires a right child");
    let inner = link(nodes, new_node).left;

    link_mut(nodes, node).right = inner;
    if let Some(inner) = inner {
        link_mut(nodes, inner).parent = Some(node);
    }
    link_mut(nodes, new_node).parent = parent;
    link_mut(nodes, new_node).left = Some(node);
    link_mut(nodes, node).parent = Some(new_node);

    update(nodes, node);
    update(nodes, new_node);
    new_node
}

fn rot_right<T: Ranked>(nodes: &mut Slab<T>, node: usize) -> usize {
    let parent = link(nodes, node).parent;
    let new_node = link(nodes, node)
        .left
        .expect("rot_right requires a left child");
    let inner = link(nodes, new_node).right;

    link_mut(nodes, node).left = inner;
    if let Some(inner) = inner {
        link_mut(nodes, inner).parent = Some(node);
    }
    link_mut(nodes, new_node).parent = parent;
    link_mut(nodes, new_node).right = Some(node);
    link_mut(nodes, node).parent = Some(new_node);

    update(nodes, node);
    update(nodes, new_node);
    new_node
}

// Left subtree is two levels taller than the right one.
fn fix_left<T: Ranked>(nodes: &mut Slab<T>, node: usize) -> usize {
    let left = link(nodes, node).left.expect("left-heavy node has a left child");
    let (ll, lr) = (link(nodes, left).left, link(nodes, left).right);
    if height(nodes, ll) < height(nodes, lr) {
        let rotated = rot_left(nodes, left);
        link_mut(nodes, node).left = Some(rotated);
    }
    rot_right(nodes, node)
}

fn fix_right<T: Ranked>(nodes: &mut Slab<T>, node: usize) -> usize {
    let right = link(nodes, node).right.expect("right-heavy node has a right child");
    let (rl, rr) = (link(nodes, right).left, link(nodes, right).right);
    if height(nodes, rr) < height(nodes, rl) {
        let rotated = rot_right(nodes, right);
        link_mut(nodes, node).right = Some(rotated);
    }
    rot_left(nodes, node)
}

/// Restore cached stats and AVL balance from `node` up to the root.
///
/// Returns the (possibly new) root of the whole tree.
pub fn fix<T: Ranked>(nodes: &mut Slab<T>, mut node: usize) -> usize {
    loop {
        let parent = link(nodes, node).parent;
        update(nodes, node);

        let (left, right) = (link(nodes, node).left, link(nodes, node).right);
        let (l, r) = (height(nodes, left), height(nodes, right));
        let mut new_node = node;
        if l == r + 2 {
            new_node = fix_left(nodes, node);
        } else if l + 2 == r {
            new_node = fix_right(nodes, node);
        }

        match parent {
            None => return new_node,
            Some(p) => {
                let pl = link_mut(nodes, p);
                if pl.left == Some(node) {
                    pl.left = Some(new_node);
                } else {
                    pl.right = Some(new_node);
                }
                node = p;
            }
        }
    }
}

/// Attach a detached node below `root` by `cmp` and rebalance.
///
/// Nodes comparing equal go to the right. Returns the new root.
pub fn insert<T, F>(nodes: &mut Slab<T>, root: Option<usize>, id: usize, mut cmp: F) -> usize
where
    T: Ranked,
    F: FnMut(&T, &T) -> Ordering,
{
    *link_mut(nodes, id) = TreeLink::new();
    let Some(mut cur) = root else {
        return id;
    };

    loop {
        let go_left = cmp(&nodes[id], &nodes[cur]) == Ordering::Less;
        let next = if go_left {
            link(nodes, cur).left
        } else {
            link(nodes, cur).right
        };
        match next {
            Some(next) => cur = next,
            None => {
                if go_left {
                    link_mut(nodes, cur).left = Some(id);
                } else {
                    link_mut(nodes, cur).right = Some(id);
                }
                link_mut(nodes, id).parent = Some(cur);
                return fix(nodes, id);
            }
        }
    }
}

// Remove a node that has at most one child.
fn delete_easy<T: Ranked>(nodes: &mut Slab<T>, node: usize) -> Option<usize> {
    let (parent, child) = {
        let l = link(nodes, node);
        debug_assert!(l.left.is_none() || l.right.is_none());
        (l.parent, l.left.or(l.right))
    };
    if let Some(child) = child {
        link_mut(nodes, child).parent = parent;
    }

    let Some(parent) = parent else {
        return child;
    };
    let pl = link_mut(nodes, parent);
    if pl.left == Some(node) {
        pl.left = child;
    } else {
        pl.right = child;
    }
    Some(fix(nodes, parent))
}

/// Unlink `node` from its tree and rebalance.
///
/// Returns the new root, `None` once the tree is empty. The removed node's
/// link is reset so it can be inserted again.
pub fn delete<T: Ranked>(nodes: &mut Slab<T>, node: usize) -> Option<usize> {
    let (left, right) = (link(nodes, node).left, link(nodes, node).right);
    let root = match (left, right) {
        (Some(_), Some(mut victim)) => {
            // Splice out the in-order successor, then put it where `node` was.
            while let Some(l) = link(nodes, victim).left {
                victim = l;
            }
            let mut root = delete_easy(nodes, victim);

            let replaced = *link(nodes, node);
            *link_mut(nodes, victim) = replaced;
            if let Some(l) = replaced.left {
                link_mut(nodes, l).parent = Some(victim);
            }
            if let Some(r) = replaced.right {
                link_mut(nodes, r).parent = Some(victim);
            }
            match replaced.parent {
                None => root = Some(victim),
                Some(p) => {
                    let pl = link_mut(nodes, p);
                    if pl.left == Some(node) {
                        pl.left = Some(victim);
                    } else {
                        pl.right = Some(victim);
                    }
                }
            }
            root
        }
        _ => delete_easy(nodes, node),
    };

    *link_mut(nodes, node) = TreeLink::new();
    root
}

/// Node `offset` positions away from `node` in order, walking the cached
/// sizes instead of stepping one node at a time.
pub fn offset<T: Ranked>(nodes: &Slab<T>, mut node: usize, offset: i64) -> Option<usize> {
    let mut pos: i64 = 0;
    while pos != offset {
        let l = link(nodes, node);
        let right_size = size(nodes, l.right) as i64;
        let left_size = size(nodes, l.left) as i64;

        if pos < offset && pos + right_size >= offset {
            let right = l.right?;
            node = right;
            pos += size(nodes, link(nodes, right).left) as i64 + 1;
        } else if pos > offset && pos - left_size <= offset {
            let left = l.left?;
            node = left;
            pos -= size(nodes, link(nodes, left).right) as i64 + 1;
        } else {
            let parent = l.parent?;
            if link(nodes, parent).right == Some(node) {
                pos -= left_size + 1;
            } else {
                pos += right_size + 1;
            }
            node = parent;
        }
    }
    Some(node)
}

/// Zero-based in-order position of `node` within its tree.
pub fn rank<T: Ranked>(nodes: &Slab<T>, mut node: usize) -> usize {
    let mut rank = size(nodes, link(nodes, node).left);
    while let Some(parent) = link(nodes, node).parent {
        let pl = link(nodes, parent);
        if pl.right == Some(node) {
            rank += size(nodes, pl.left) + 1;
        }
        node = parent;
    }
    rank
}

/// Leftmost node of the subtree rooted at `root`.
pub fn first<T: Ranked>(nodes: &Slab<T>, root: Option<usize>) -> Option<usize> {
    let mut cur = root?;
    while let Some(left) = link(nodes, cur).left {
        cur = left;
    }
    Some(cur)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug)]
    struct Item {
        link: TreeLink,
        key: u32,
    }

    impl Ranked for Item {
        fn tree_link(&self) -> &TreeLink {
            &self.link
        }

        fn tree_link_mut(&mut self) -> &mut TreeLink {
            &mut self.link
        }
    }

    #[derive(Default)]
    struct Tree {
        nodes: Slab<Item>,
        root: Option<usize>,
    }

    impl Tree {
        fn add(&mut self, key: u32) -> usize {
            let id = self.nodes.insert(Item {
                link: TreeLink::new(),
                key,
            });
            self.root = Some(insert(&mut self.nodes, self.root, id, |a, b| {
                a.key.cmp(&b.key)
            }));
            id
        }

        fn del(&mut self, id: usize) {
            self.root = delete(&mut self.nodes, id);
            self.nodes.remove(id);
        }

        fn in_order(&self) -> Vec<u32> {
            let mut out = Vec::new();
            let mut cur = first(&self.nodes, self.root);
            while let Some(id) = cur {
                out.push(self.nodes[id].key);
                cur = offset(&self.nodes, id, 1);
            }
            out
        }

        // Returns (height, size) and asserts every cached field along the way.
        fn verify(&self, node: Option<usize>, parent: Option<usize>) -> (u32, usize) {
            let Some(id) = node else {
                return (0, 0);
            };
            let l = self.nodes[id].link;
            assert_eq!(l.parent, parent, "parent pointer of {}", self.nodes[id].key);
            let (lh, ls) = self.verify(l.left, Some(id));
            let (rh, rs) = self.verify(l.right, Some(id));
            assert!(lh.abs_diff(rh) <= 1, "unbalanced at {}", self.nodes[id].key);
            assert_eq!(l.height, 1 + lh.max(rh));
            assert_eq!(l.size, 1 + ls + rs);
            if let Some(left) = l.left {
                assert!(self.nodes[left].key <= self.nodes[id].key);
            }
            if let Some(right) = l.right {
                assert!(self.nodes[right].key >= self.nodes[id].key);
            }
            (l.height, l.size)
        }

        fn check(&self) {
            let (_, total) = self.verify(self.root, None);
            assert_eq!(total, self.nodes.len());
        }
    }

    #[test]
    fn test_sequential_inserts_stay_balanced() {
        let mut tree = Tree::default();
        for key in 0..200 {
            tree.add(key);
            tree.check();
        }
        let root = tree.root.unwrap();
        assert!(tree.nodes[root].link.height() <= 11);
        assert_eq!(tree.in_order(), (0..200).collect::<Vec<_>>());
    }

    #[test]
    fn test_delete_inner_nodes_and_root() {
        let mut tree = Tree::default();
        let ids: Vec<usize> = (0..50).map(|k| tree.add(k * 2)).collect();

        for (i, id) in ids.iter().enumerate() {
            if i % 3 == 0 {
                tree.del(*id);
                tree.check();
            }
        }
        while let Some(root) = tree.root {
            tree.del(root);
            tree.check();
        }
        assert!(tree.nodes.is_empty());
    }

    #[test]
    fn test_delete_resets_link() {
        let mut tree = Tree::default();
        for key in 0..10 {
            tree.add(key);
        }
        let root = tree.root.unwrap();
        tree.root = delete(&mut tree.nodes, root);
        assert_eq!(tree.nodes[root].link, TreeLink::new());

        tree.root = Some(insert(&mut tree.nodes, tree.root, root, |a, b| a.key.cmp(&b.key)));
        tree.check();
        assert_eq!(tree.in_order(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_offset_and_rank() {
        let mut tree = Tree::default();
        let ids: Vec<usize> = (0..100).map(|k| tree.add(k)).collect();

        for (i, &id) in ids.iter().enumerate() {
            assert_eq!(rank(&tree.nodes, id), i);
            assert_eq!(offset(&tree.nodes, id, 0), Some(id));
            for k in -110i64..110 {
                let target = i as i64 + k;
                let got = offset(&tree.nodes, id, k);
                if (0..100).contains(&target) {
                    assert_eq!(got, Some(ids[target as usize]));
                    assert_eq!(offset(&tree.nodes, got.unwrap(), -k), Some(id));
                } else {
                    assert_eq!(got, None);
                }
            }
        }
    }

    #[test]
    fn test_fix_after_key_change() {
        let mut tree = Tree::default();
        let ids: Vec<usize> = (0..20).map(|k| tree.add(k * 10)).collect();

        let moved = ids[3];
        tree.root = delete(&mut tree.nodes, moved);
        tree.nodes[moved].key = 1000;
        tree.root = Some(insert(&mut tree.nodes, tree.root, moved, |a, b| a.key.cmp(&b.key)));

        tree.check();
        assert_eq!(rank(&tree.nodes, moved), 19);
        assert_eq!(*tree.in_order().last().unwrap(), 1000);
    }

    #[derive(Clone, Debug)]
    enum Op {
        Insert(u32),
        DeleteNth(usize),
    }

    fn ops_strategy() -> impl Strategy<Value = Vec<Op>> {
        let op = prop_oneof![
            3 => (0u32..500).prop_map(Op::Insert),
            2 => any::<usize>().prop_map(Op::DeleteNth),
        ];
        prop::collection::vec(op, 0..=400)
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            .. ProptestConfig::default()
        })]

        #[test]
        fn prop_matches_sorted_vec(ops in ops_strategy()) {
            let mut tree = Tree::default();
            let mut model: Vec<u32> = Vec::new();

            for op in ops {
                match op {
                    Op::Insert(key) => {
                        tree.add(key);
                        let at = model.partition_point(|k| *k <= key);
                        model.insert(at, key);
                    }
                    Op::DeleteNth(n) => {
                        if model.is_empty() {
                            continue;
                        }
                        let n = n % model.len();
                        let first = first(&tree.nodes, tree.root).unwrap();
                        let id = offset(&tree.nodes, first, n as i64).unwrap();
                        prop_assert_eq!(tree.nodes[id].key, model[n]);
                        tree.del(id);
                        model.remove(n);
                    }
                }
                tree.check();
            }

            prop_assert_eq!(tree.in_order(), model.clone());
            if let Some(first) = first(&tree.nodes, tree.root) {
                let len = model.len() as i64;
                prop_assert_eq!(offset(&tree.nodes, first, len), None);
                prop_assert_eq!(offset(&tree.nodes, first, -1), None);
            }
        }
    }
}
