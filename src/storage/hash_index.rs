use slab::Slab;

/// Chain link embedded in every record that lives in a [`HashIndex`].
///
/// The index only ever stores slab keys; the record that carries the link
/// stays owned by the caller's arena.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashLink {
    next: Option<usize>,
    hcode: u64,
}

impl HashLink {
    pub fn new(hcode: u64) -> Self {
        Self { next: None, hcode }
    }

    pub fn hcode(&self) -> u64 {
        self.hcode
    }
}

/// Access to the [`HashLink`] embedded in a record.
pub trait Hashed {
    fn hash_link(&self) -> &HashLink;
    fn hash_link_mut(&mut self) -> &mut HashLink;
}

/// Sizing knobs for progressive resizing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexPolicy {
    /// Slot count of the first table, must be a power of two
    pub initial_capacity: usize,
    /// A resize starts once `size >= capacity * load_factor`
    pub load_factor: usize,
    /// Units of migration work done per insert while a resize is in flight
    pub migrate_batch: usize,
}

impl Default for IndexPolicy {
    fn default() -> Self {
        Self {
            initial_capacity: 4,
            load_factor: 1,
            migrate_batch: 128,
        }
    }
}

#[derive(Debug, Default)]
struct Table {
    slots: Vec<Option<usize>>,
    mask: usize,
    size: usize,
}

/// Location of the reference that points at a chained node
#[derive(Debug, Clone, Copy)]
enum Slot {
    Head(usize),
    After(usize),
}

#[derive(Debug, Clone, Copy)]
enum Generation {
    Newer,
    Older,
}

impl Table {
    fn with_capacity(capacity: usize) -> Self {
        debug_assert!(capacity.is_power_of_two());
        Self {
            slots: vec![None; capacity],
            mask: capacity - 1,
            size: 0,
        }
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn is_allocated(&self) -> bool {
        !self.slots.is_empty()
    }

    fn push<T: Hashed>(&mut self, nodes: &mut Slab<T>, id: usize) {
        let pos = (nodes[id].hash_link().hcode as usize) & self.mask;
        nodes[id].hash_link_mut().next = self.slots[pos];
        self.slots[pos] = Some(id);
        self.size += 1;
    }

    fn find<T, F>(&self, nodes: &Slab<T>, hcode: u64, mut eq: F) -> Option<(Slot, usize)>
    where
        T: Hashed,
        F: FnMut(usize, &T) -> bool,
    {
        if !self.is_allocated() {
            return None;
        }

        let pos = (hcode as usize) & self.mask;
        let mut from = Slot::Head(pos);
        let mut cur = self.slots[pos];
        while let Some(id) = cur {
            let node = &nodes[id];
            if node.hash_link().hcode == hcode && eq(id, node) {
                return Some((from, id));
            }
            from = Slot::After(id);
            cur = node.hash_link().next;
        }
        None
    }

    fn detach<T: Hashed>(&mut self, nodes: &mut Slab<T>, from: Slot, id: usize) {
        let next = nodes[id].hash_link().next;
        match from {
            Slot::Head(pos) => self.slots[pos] = next,
            Slot::After(prev) => nodes[prev].hash_link_mut().next = next,
        }
        nodes[id].hash_link_mut().next = None;
        self.size -= 1;
    }
}

/// Chained hash index with progressive resizing.
///
/// Two generations of chain tables coexist while a resize is in flight:
/// inserts always land in `newer`, and every insert moves a bounded number
/// of nodes out of `older` until it is empty. Reads and deletes consult
/// both generations, so no single operation ever pays for a full rehash.
///
/// All calls on one index must pass the same arena. Keys handed to
/// [`HashIndex::insert`] must refer to records that are not already linked.
#[derive(Debug, Default)]
pub struct HashIndex {
    newer: Table,
    older: Table,
    migrate_pos: usize,
    policy: IndexPolicy,
}

impl HashIndex {
    pub fn new() -> Self {
        Self::with_policy(IndexPolicy::default())
    }

    pub fn with_policy(policy: IndexPolicy) -> Self {
        Self {
            newer: Table::default(),
            older: Table::default(),
            migrate_pos: 0,
            policy,
        }
    }

    /// Number of linked nodes across both generations
    pub fn len(&self) -> usize {
        self.newer.size + self.older.size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slot count of the newer generation
    pub fn capacity(&self) -> usize {
        self.newer.capacity()
    }

    /// True while nodes are still being migrated out of the older table
    pub fn is_resizing(&self) -> bool {
        self.older.is_allocated()
    }

    /// Link `id` into the newer generation, then do one batch of migration work.
    pub fn insert<T: Hashed>(&mut self, nodes: &mut Slab<T>, id: usize) {
        if !self.newer.is_allocated() {
            self.newer = Table::with_capacity(self.policy.initial_capacity);
        }
        self.newer.push(nodes, id);

        let threshold = self
            .newer
            .capacity()
            .saturating_mul(self.policy.load_factor);
        if !self.older.is_allocated() && self.newer.size >= threshold {
            self.start_resizing();
        }
        self.help_resizing(nodes);
    }

    /// Find the first node with hash `hcode` for which `eq` holds.
    pub fn lookup<T, F>(&self, nodes: &Slab<T>, hcode: u64, mut eq: F) -> Option<usize>
    where
        T: Hashed,
        F: FnMut(&T) -> bool,
    {
        self.find(nodes, hcode, |_, node| eq(node))
            .map(|(_, _, id)| id)
    }

    /// Unlink the first matching node and hand its key back to the caller,
    /// who owns freeing the record.
    pub fn remove<T, F>(&mut self, nodes: &mut Slab<T>, hcode: u64, mut eq: F) -> Option<usize>
    where
        T: Hashed,
        F: FnMut(&T) -> bool,
    {
        let (generation, from, id) = self.find(nodes, hcode, |_, node| eq(node))?;
        self.table_mut(generation).detach(nodes, from, id);
        Some(id)
    }

    /// Unlink a node already known by key, matching on identity rather than content.
    pub fn remove_node<T: Hashed>(&mut self, nodes: &mut Slab<T>, id: usize) -> bool {
        let hcode = nodes[id].hash_link().hcode;
        match self.find(nodes, hcode, |candidate, _| candidate == id) {
            Some((generation, from, found)) => {
                self.table_mut(generation).detach(nodes, from, found);
                true
            }
            None => false,
        }
    }

    /// Drop both chain tables. Records are untouched; the caller frees them.
    pub fn clear(&mut self) {
        self.newer = Table::default();
        self.older = Table::default();
        self.migrate_pos = 0;
    }

    /// Visit the key of every linked node, older generation included.
    pub fn iter<'a, T: Hashed>(&'a self, nodes: &'a Slab<T>) -> Iter<'a, T> {
        Iter {
            nodes,
            tables: [&self.newer, &self.older],
            table: 0,
            slot: 0,
            cur: None,
        }
    }

    fn find<T, F>(&self, nodes: &Slab<T>, hcode: u64, mut eq: F) -> Option<(Generation, Slot, usize)>
    where
        T: Hashed,
        F: FnMut(usize, &T) -> bool,
    {
        if let Some((from, id)) = self.newer.find(nodes, hcode, &mut eq) {
            return Some((Generation::Newer, from, id));
        }
        if self.older.size > 0 {
            if let Some((from, id)) = self.older.find(nodes, hcode, &mut eq) {
                return Some((Generation::Older, from, id));
            }
        }
        None
    }

    fn table_mut(&mut self, generation: Generation) -> &mut Table {
        match generation {
            Generation::Newer => &mut self.newer,
            Generation::Older => &mut self.older,
        }
    }

    fn start_resizing(&mut self) {
        let capacity = self.newer.capacity() * 2;
        self.older = std::mem::replace(&mut self.newer, Table::with_capacity(capacity));
        self.migrate_pos = 0;
    }

    // One unit of work is either moving a node or stepping over an empty slot.
    fn help_resizing<T: Hashed>(&mut self, nodes: &mut Slab<T>) {
        let mut work = 0;
        while work < self.policy.migrate_batch && self.older.size > 0 {
            let pos = self.migrate_pos;
            match self.older.slots[pos] {
                None => self.migrate_pos += 1,
                Some(id) => {
                    self.older.detach(nodes, Slot::Head(pos), id);
                    self.newer.push(nodes, id);
                }
            }
            work += 1;
        }

        if self.older.is_allocated() && self.older.size == 0 {
            self.older = Table::default();
            self.migrate_pos = 0;
        }
    }
}

/// Iterator over the keys linked into a [`HashIndex`]
pub struct Iter<'a, T> {
    nodes: &'a Slab<T>,
    tables: [&'a Table; 2],
    table: usize,
    slot: usize,
    cur: Option<usize>,
}

impl<T: Hashed> Iterator for Iter<'_, T> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        loop {
            if let Some(id) = self.cur {
                self.cur = self.nodes[id].hash_link().next;
                return Some(id);
            }
            let table = self.tables.get(self.table)?;
            if self.slot < table.slots.len() {
                self.cur = table.slots[self.slot];
                self.slot += 1;
            } else {
                self.table += 1;
                self.slot = 0;
            }
        }
    }
}
