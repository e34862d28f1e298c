use super::*;

use proptest::prelude::*;
use std::collections::VecDeque;

fn small() -> Config {
    Config {
        capacity: 4096,
        ..Config::default()
    }
}

/// Reference tree over plain Vecs. Children are kept oldest first; slot 0
/// stands in for the sentinel. Its rewrites renumber nodes the same way the
/// real ones do (breadth-first, oldest child first), so ids can be compared
/// directly.
#[derive(Clone, Debug)]
struct Model {
    parent: Vec<usize>,
    children: Vec<Vec<usize>>,
    values: Vec<u64>,
}

impl Model {
    fn empty() -> Self {
        Model {
            parent: vec![0],
            children: vec![Vec::new()],
            values: vec![0],
        }
    }

    fn len(&self) -> usize {
        self.parent.len()
    }

    fn insert(&mut self, parent: usize, value: u64) -> usize {
        let id = self.parent.len();
        self.parent.push(parent);
        self.children.push(Vec::new());
        self.values.push(value);
        self.children[parent].push(id);
        id
    }

    fn depth(&self, mut n: usize) -> usize {
        let mut d = 1;
        while self.parent[n] != 0 {
            n = self.parent[n];
            d += 1;
        }
        d
    }

    fn height_below(&self, n: usize) -> usize {
        1 + self.children[n]
            .iter()
            .map(|&c| self.height_below(c))
            .max()
            .unwrap_or(0)
    }

    fn reroot(&mut self, new_root: usize) {
        let mut fresh = Model::empty();
        let mut map = vec![0usize; self.len()];
        map[new_root] = fresh.insert(0, self.values[new_root]);
        let mut queue = VecDeque::new();
        queue.push_back(new_root);
        while let Some(old) = queue.pop_front() {
            for &c in &self.children[old] {
                map[c] = fresh.insert(map[old], self.values[c]);
                queue.push_back(c);
            }
        }
        *self = fresh;
    }

    fn flatten(&mut self) {
        if self.len() <= 1 {
            return;
        }
        let mut fresh = Model::empty();
        let root = fresh.insert(0, self.values[1]);
        let kids = self.children[1].clone();
        for c in kids {
            fresh.insert(root, self.values[c]);
        }
        *self = fresh;
    }

    fn clear(&mut self) {
        *self = Model::empty();
    }
}

fn validate(t: &Tree<u64>, m: &Model) {
    assert_eq!(t.len(), m.len());
    assert_eq!(t.is_empty(), m.len() == 1);
    if m.len() == 1 {
        assert_eq!(t.root(), NodeId::NONE);
        assert_eq!(t.height(), 0);
        return;
    }
    assert_eq!(t.root(), NodeId::ROOT);
    for i in 1..m.len() {
        let id = NodeId::from_index(i);
        let node = &t[id];
        assert_eq!(node.value, m.values[i], "value of node {i}");
        assert_eq!(node.parent().index(), m.parent[i], "parent of node {i}");
        assert_eq!(
            node.child_count() as usize,
            m.children[i].len(),
            "child count of node {i}"
        );
        let kids: Vec<usize> = t.children(id).map(NodeId::index).collect();
        let mut expect = m.children[i].clone();
        expect.reverse();
        assert_eq!(kids, expect, "children of node {i} (newest first)");
        assert_eq!(t.ancestors(id).count(), m.depth(i), "depth of node {i}");
    }
    // Depth-first reaches every node exactly once.
    let mut seen: Vec<usize> = t.depth_first().map(NodeId::index).collect();
    seen.sort_unstable();
    let expect: Vec<usize> = (1..m.len()).collect();
    assert_eq!(seen, expect);
    assert_eq!(t.level_order().count(), m.len() - 1);
    assert_eq!(t.height(), m.height_below(1));
}

fn validate_concurrent(t: &ConcurrentTree<u64>, m: &Model) {
    // The tree's len is the allocator watermark; count built slots instead.
    let built = (1..t.len())
        .filter(|&i| t.is_built(NodeId::from_index(i)))
        .count();
    assert_eq!(built, m.len() - 1);
    for i in 1..m.len() {
        let id = NodeId::from_index(i);
        let node = &t[id];
        assert_eq!(node.value, m.values[i], "value of node {i}");
        assert_eq!(node.parent().index(), m.parent[i], "parent of node {i}");
        assert_eq!(
            node.child_count() as usize,
            m.children[i].len(),
            "child count of node {i}"
        );
        let kids: Vec<usize> = t.children(id).map(NodeId::index).collect();
        let mut expect = m.children[i].clone();
        expect.reverse();
        assert_eq!(kids, expect, "children of node {i} (newest first)");
        assert_eq!(t.ancestors(id).count(), m.depth(i), "depth of node {i}");
    }
    let mut seen: Vec<usize> = t.depth_first().map(NodeId::index).collect();
    seen.sort_unstable();
    let expect: Vec<usize> = (1..m.len()).collect();
    assert_eq!(seen, expect);
    assert_eq!(t.height(), m.height_below(1));
}

#[derive(Clone, Debug)]
enum Op {
    Insert(usize),
    Reroot(usize),
    Flatten,
    Clear,
}

fn ops_strategy() -> impl Strategy<Value = Vec<Op>> {
    let op = prop_oneof![
        85 => any::<usize>().prop_map(Op::Insert),
        6 => any::<usize>().prop_map(Op::Reroot),
        6 => Just(Op::Flatten),
        3 => Just(Op::Clear),
    ];
    prop::collection::vec(op, 0..=400)
}

fn concurrent_ops_strategy() -> impl Strategy<Value = Vec<Op>> {
    // No Clear: a concurrent tree always has its root.
    let op = prop_oneof![
        88 => any::<usize>().prop_map(Op::Insert),
        6 => any::<usize>().prop_map(Op::Reroot),
        6 => Just(Op::Flatten),
    ];
    prop::collection::vec(op, 0..=400)
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        max_shrink_iters: 50_000,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_tree_matches_model(ops in ops_strategy()) {
        let mut t: Tree<u64> = Tree::with_config(small());
        let mut m = Model::empty();
        let mut next_value = 1u64;

        for op in ops {
            match op {
                Op::Insert(pick) => {
                    let v = next_value;
                    next_value += 1;
                    if m.len() == 1 {
                        let id = t.insert(NodeId::NONE, v);
                        prop_assert_eq!(id.index(), m.insert(0, v));
                    } else {
                        let parent = 1 + pick % (m.len() - 1);
                        let id = t.insert(NodeId::from_index(parent), v);
                        prop_assert_eq!(id.index(), m.insert(parent, v));
                    }
                }
                Op::Reroot(pick) => {
                    if m.len() > 1 {
                        let target = 1 + pick % (m.len() - 1);
                        t.reroot(NodeId::from_index(target));
                        m.reroot(target);
                    }
                }
                Op::Flatten => {
                    t.flatten();
                    m.flatten();
                }
                Op::Clear => {
                    t.clear();
                    m.clear();
                }
            }

            prop_assert_eq!(t.len(), m.len());
        }

        validate(&t, &m);
    }

    #[test]
    fn prop_concurrent_matches_model(ops in concurrent_ops_strategy()) {
        let mut t: ConcurrentTree<u64> = ConcurrentTree::with_config(0, small());
        let mut m = Model::empty();
        m.insert(0, 0);
        let mut next_value = 1u64;

        for op in ops {
            match op {
                Op::Insert(pick) => {
                    let parent = 1 + pick % (m.len() - 1);
                    let v = next_value;
                    next_value += 1;
                    // Ids are dense while one thread inserts, so they can be
                    // compared against the model's.
                    let id = t.insert(NodeId::from_index(parent), v);
                    prop_assert_eq!(id.index(), m.insert(parent, v));
                }
                Op::Reroot(pick) => {
                    let target = 1 + pick % (m.len() - 1);
                    t.reroot(NodeId::from_index(target));
                    m.reroot(target);
                }
                Op::Flatten => {
                    t.flatten();
                    m.flatten();
                }
                Op::Clear => unreachable!(),
            }
        }

        validate_concurrent(&t, &m);
    }
}

#[test]
fn exhaustive_small_shapes() {
    // Every parent assignment for nodes 2..=5 (node 2 is always under the
    // root): 24 shapes, each validated as built, after every possible
    // reroot, and after flatten.
    for p3 in 1..=2usize {
        for p4 in 1..=3usize {
            for p5 in 1..=4usize {
                let parents = [1usize, p3, p4, p5];
                let build = || {
                    let mut t: Tree<u64> = Tree::with_config(small());
                    let mut m = Model::empty();
                    t.insert(NodeId::NONE, 1);
                    m.insert(0, 1);
                    for (i, &p) in parents.iter().enumerate() {
                        let v = (i + 2) as u64;
                        t.insert(NodeId::from_index(p), v);
                        m.insert(p, v);
                    }
                    (t, m)
                };

                let (t, m) = build();
                validate(&t, &m);

                for target in 1..=5 {
                    let (mut t, mut m) = build();
                    t.reroot(NodeId::from_index(target));
                    m.reroot(target);
                    validate(&t, &m);
                }

                let (mut t, mut m) = build();
                t.flatten();
                m.flatten();
                validate(&t, &m);
            }
        }
    }
}
