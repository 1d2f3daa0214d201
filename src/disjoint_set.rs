use std::collections::HashMap;
use std::hash::Hash;

/// Handle of a partition: the index of its root node.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub(crate) struct PartitionId(usize);

#[derive(Clone, Debug)]
struct Node<T> {
    value: T,
    parent: usize,
    rank: u32,
}

/// Union-find over an arena of nodes, with a side table from element to handle.
///
/// Unions are by rank with path compression; partitions are never split.
#[derive(Clone, Debug)]
pub(crate) struct DisjointSet<T> {
    nodes: Vec<Node<T>>,
    index: HashMap<T, usize>,
    partitions: usize,
}

impl<T: Clone + Eq + Hash> Default for DisjointSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Eq + Hash> DisjointSet<T> {
    pub(crate) fn new() -> Self {
        Self {
            nodes: Vec::new(),
            index: HashMap::new(),
            partitions: 0,
        }
    }

    /// Adds `value` as a singleton unless already present and returns its partition.
    pub(crate) fn add(&mut self, value: T) -> PartitionId {
        let handle = self.handle(value);
        PartitionId(self.find_compress(handle))
    }

    fn handle(&mut self, value: T) -> usize {
        if let Some(handle) = self.index.get(&value) {
            return *handle;
        }
        let handle = self.nodes.len();
        self.nodes.push(Node {
            value: value.clone(),
            parent: handle,
            rank: 0,
        });
        self.index.insert(value, handle);
        self.partitions += 1;
        handle
    }

    /// Merges the partitions of `a` and `b`, adding either if needed.
    pub(crate) fn union(&mut self, a: T, b: T) {
        let a = self.handle(a);
        let b = self.handle(b);
        let root_a = self.find_compress(a);
        let root_b = self.find_compress(b);
        if root_a == root_b {
            return;
        }
        let (low, high) = if self.nodes[root_a].rank < self.nodes[root_b].rank {
            (root_a, root_b)
        } else {
            (root_b, root_a)
        };
        self.nodes[low].parent = high;
        if self.nodes[low].rank == self.nodes[high].rank {
            self.nodes[high].rank += 1;
        }
        self.partitions -= 1;
    }

    fn find_compress(&mut self, handle: usize) -> usize {
        let root = self.find(handle);
        let mut current = handle;
        while self.nodes[current].parent != root {
            let next = self.nodes[current].parent;
            self.nodes[current].parent = root;
            current = next;
        }
        root
    }

    fn find(&self, mut handle: usize) -> usize {
        while self.nodes[handle].parent != handle {
            handle = self.nodes[handle].parent;
        }
        handle
    }

    pub(crate) fn get(&self, value: &T) -> Option<PartitionId> {
        self.index
            .get(value)
            .map(|handle| PartitionId(self.find(*handle)))
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn partition_count(&self) -> usize {
        self.partitions
    }

    /// All partitions, ordered by the insertion order of their first element; members keep
    /// insertion order too.
    pub(crate) fn partitions(&self) -> Vec<(PartitionId, Vec<T>)> {
        let mut order = Vec::new();
        let mut groups: HashMap<usize, Vec<T>> = HashMap::new();
        for (handle, node) in self.nodes.iter().enumerate() {
            let root = self.find(handle);
            let group = groups.entry(root).or_insert_with(|| {
                order.push(root);
                Vec::new()
            });
            group.push(node.value.clone());
        }
        order
            .into_iter()
            .filter_map(|root| {
                groups
                    .remove(&root)
                    .map(|members| (PartitionId(root), members))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_merges_transitively_and_counts_partitions() {
        let mut set = DisjointSet::new();
        set.add("a");
        set.add("b");
        set.add("c");
        set.add("d");
        assert_eq!(set.partition_count(), 4);

        set.union("a", "b");
        set.union("c", "b");
        set.union("a", "c");

        assert_eq!(set.partition_count(), 2);
        assert_eq!(set.get(&"a"), set.get(&"c"));
        assert_ne!(set.get(&"a"), set.get(&"d"));
        assert_eq!(set.len(), 4);
    }

    #[test]
    fn union_adds_missing_elements() {
        let mut set = DisjointSet::new();
        set.union(1, 2);

        assert_eq!(set.len(), 2);
        assert_eq!(set.partition_count(), 1);
        assert!(set.get(&3).is_none());
    }

    #[test]
    fn partitions_are_ordered_by_first_insertion() {
        let mut set = DisjointSet::new();
        set.add("x");
        set.add("y");
        set.add("z");
        set.union("z", "x");

        let partitions: Vec<Vec<&str>> = set
            .partitions()
            .into_iter()
            .map(|(_, members)| members)
            .collect();

        assert_eq!(partitions, vec![vec!["x", "z"], vec!["y"]]);
    }

    #[test]
    fn add_returns_existing_partition() {
        let mut set = DisjointSet::new();
        set.union("p", "q");
        let id = set.add("q");

        assert_eq!(Some(id), set.get(&"p"));
        assert_eq!(set.partition_count(), 1);
    }
}
