//! Cascade planning for looped triggers.
//!
//! A cascade starts at the triggerables attached to a looped trigger (the
//! roots) and follows the chained `finished` triggers. The compiler turns
//! that into a flat, depth-ordered plan:
//!
//! 1. Reachable set: BFS over chained listeners, in connection order.
//! 2. Chain cycles: iterative DFS from each root. An edge back to a node on
//!    the DFS stack is reported as a cycle and dropped from the plan.
//! 3. Ordering: kept chain edges plus data edges (producer before consumer)
//!    between reachable nodes. A data edge that would close a cycle is
//!    ignored, so feedback through buffers stays legal.
//! 4. Depth: longest-path layering with Kahn's algorithm.
//!
//! Everything is iterative; plan size is not bounded by the stack.

use crate::engine::id::NodeId;
use crate::engine::triggerable::Triggerable;
use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// One planned triggerable.
#[derive(Clone)]
pub struct CascadeEntry {
    pub node: Arc<dyn Triggerable>,
    pub id: NodeId,
    pub name: String,
    pub depth: usize,
    /// Directly attached to the looped trigger; always runs.
    pub root: bool,
    /// Positions (in `CascadePlan::entries`) of the chain predecessors.
    pub chain_preds: Vec<usize>,
}

impl std::fmt::Debug for CascadeEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CascadeEntry")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("depth", &self.depth)
            .field("root", &self.root)
            .field("chain_preds", &self.chain_preds)
            .finish()
    }
}

/// A chain edge dropped because it revisits a triggerable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainCycle {
    pub from: String,
    pub to: String,
}

impl ChainCycle {
    pub fn to_error(&self) -> EngineError {
        EngineError::TriggerCycle {
            from: self.from.clone(),
            to: self.to.clone(),
        }
    }
}

/// Statistics about the compiled plan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStats {
    /// Number of planned triggerables
    pub total_nodes: usize,

    /// Number of directly attached triggerables
    pub root_nodes: usize,

    /// Chain edges kept in the plan
    pub chain_edges: usize,

    /// Data edges used for ordering
    pub data_edges: usize,

    /// Data edges ignored because they would close a cycle
    pub feedback_edges: usize,

    /// Number of distinct depths
    pub depth_count: usize,

    /// Compilation time in microseconds
    pub compile_time_us: u64,
}

/// Triggerables grouped by depth, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggeringOrder {
    pub levels: Vec<(usize, Vec<NodeId>)>,
}

impl TriggeringOrder {
    pub fn depth_of(&self, id: NodeId) -> Option<usize> {
        self.levels
            .iter()
            .find(|(_, nodes)| nodes.contains(&id))
            .map(|(depth, _)| *depth)
    }

    /// All ids in execution order.
    pub fn flatten(&self) -> Vec<NodeId> {
        self.levels
            .iter()
            .flat_map(|(_, nodes)| nodes.iter().copied())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.levels.iter().map(|(_, nodes)| nodes.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

/// Compiled cascade plan.
#[derive(Debug, Clone, Default)]
pub struct CascadePlan {
    /// Sorted by depth, then by discovery order.
    pub entries: Vec<CascadeEntry>,
    pub cycles: Vec<ChainCycle>,
    pub stats: PlanStats,
}

impl CascadePlan {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn order(&self) -> TriggeringOrder {
        let mut levels: Vec<(usize, Vec<NodeId>)> = Vec::new();
        for entry in &self.entries {
            match levels.last_mut() {
                Some((depth, nodes)) if *depth == entry.depth => nodes.push(entry.id),
                _ => levels.push((entry.depth, vec![entry.id])),
            }
        }
        TriggeringOrder { levels }
    }

    pub fn errors(&self) -> Vec<EngineError> {
        self.cycles.iter().map(ChainCycle::to_error).collect()
    }
}

/// Compiles a set of root triggerables into a cascade plan
pub struct CascadeCompiler;

impl CascadeCompiler {
    pub fn compile(roots: &[Arc<dyn Triggerable>]) -> CascadePlan {
        let start_time = std::time::Instant::now();

        // Reachable set and chain adjacency
        let (nodes, chain_adj, root_count) = Self::collect_reachable(roots);
        let n = nodes.len();
        if n == 0 {
            return CascadePlan::default();
        }

        // Break chain cycles
        let (chain_kept, cycles) = Self::drop_chain_cycles(&nodes, &chain_adj, root_count);

        // Add data edges that keep the graph acyclic
        let index: HashMap<NodeId, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (node.id(), i))
            .collect();
        let mut adj = chain_kept.clone();
        let mut data_edges = 0;
        let mut feedback_edges = 0;
        for (consumer, node) in nodes.iter().enumerate() {
            for producer in node.upstream() {
                let Some(&from) = index.get(&producer) else {
                    continue;
                };
                if from == consumer || adj[from].contains(&consumer) {
                    continue;
                }
                if Self::reaches(&adj, consumer, from) {
                    feedback_edges += 1;
                    continue;
                }
                adj[from].push(consumer);
                data_edges += 1;
            }
        }

        let depth = Self::longest_path_depths(&adj);

        // Stable ordering: depth first, then discovery order
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by_key(|&i| (depth[i], i));
        let mut position = vec![0; n];
        for (pos, &i) in order.iter().enumerate() {
            position[i] = pos;
        }

        let mut chain_preds = vec![Vec::new(); n];
        for (from, targets) in chain_kept.iter().enumerate() {
            for &to in targets {
                chain_preds[to].push(position[from]);
            }
        }

        let entries: Vec<CascadeEntry> = order
            .iter()
            .map(|&i| CascadeEntry {
                node: nodes[i].clone(),
                id: nodes[i].id(),
                name: nodes[i].name(),
                depth: depth[i],
                root: i < root_count,
                chain_preds: std::mem::take(&mut chain_preds[i]),
            })
            .collect();

        let mut depth_count = 0;
        let mut last = None;
        for entry in &entries {
            if last != Some(entry.depth) {
                depth_count += 1;
                last = Some(entry.depth);
            }
        }

        let stats = PlanStats {
            total_nodes: n,
            root_nodes: root_count,
            chain_edges: chain_kept.iter().map(Vec::len).sum(),
            data_edges,
            feedback_edges,
            depth_count,
            compile_time_us: start_time.elapsed().as_micros() as u64,
        };

        CascadePlan {
            entries,
            cycles,
            stats,
        }
    }

    /// BFS from the roots over chained listeners. Roots come first.
    fn collect_reachable(
        roots: &[Arc<dyn Triggerable>],
    ) -> (Vec<Arc<dyn Triggerable>>, Vec<Vec<usize>>, usize) {
        let mut nodes: Vec<Arc<dyn Triggerable>> = Vec::new();
        let mut index: HashMap<NodeId, usize> = HashMap::new();
        let mut queue = VecDeque::new();

        for root in roots {
            if index.contains_key(&root.id()) {
                continue;
            }
            index.insert(root.id(), nodes.len());
            queue.push_back(nodes.len());
            nodes.push(root.clone());
        }
        let root_count = nodes.len();

        let mut chain_adj: Vec<Vec<usize>> = vec![Vec::new(); root_count];
        while let Some(current) = queue.pop_front() {
            for listener in nodes[current].finished().listeners() {
                let target = match index.get(&listener.id()) {
                    Some(&existing) => existing,
                    None => {
                        let idx = nodes.len();
                        index.insert(listener.id(), idx);
                        nodes.push(listener);
                        chain_adj.push(Vec::new());
                        queue.push_back(idx);
                        idx
                    }
                };
                if !chain_adj[current].contains(&target) {
                    chain_adj[current].push(target);
                }
            }
        }

        (nodes, chain_adj, root_count)
    }

    /// Iterative DFS. Returns the chain adjacency without back edges and the
    /// dropped edges.
    fn drop_chain_cycles(
        nodes: &[Arc<dyn Triggerable>],
        chain_adj: &[Vec<usize>],
        root_count: usize,
    ) -> (Vec<Vec<usize>>, Vec<ChainCycle>) {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            OnStack,
            Done,
        }

        let n = nodes.len();
        let mut marks = vec![Mark::Unvisited; n];
        let mut kept = vec![Vec::new(); n];
        let mut cycles = Vec::new();

        let starts = (0..root_count).chain(root_count..n);
        for start in starts {
            if marks[start] != Mark::Unvisited {
                continue;
            }
            let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
            marks[start] = Mark::OnStack;
            while let Some((node, next)) = stack.last_mut() {
                let node = *node;
                if *next >= chain_adj[node].len() {
                    marks[node] = Mark::Done;
                    stack.pop();
                    continue;
                }
                let target = chain_adj[node][*next];
                *next += 1;
                match marks[target] {
                    Mark::OnStack => cycles.push(ChainCycle {
                        from: nodes[node].name(),
                        to: nodes[target].name(),
                    }),
                    Mark::Done => kept[node].push(target),
                    Mark::Unvisited => {
                        kept[node].push(target);
                        marks[target] = Mark::OnStack;
                        stack.push((target, 0));
                    }
                }
            }
        }

        (kept, cycles)
    }

    /// Whether `to` is reachable from `from`.
    fn reaches(adj: &[Vec<usize>], from: usize, to: usize) -> bool {
        let mut seen = vec![false; adj.len()];
        let mut stack = vec![from];
        seen[from] = true;
        while let Some(node) = stack.pop() {
            if node == to {
                return true;
            }
            for &next in &adj[node] {
                if !seen[next] {
                    seen[next] = true;
                    stack.push(next);
                }
            }
        }
        false
    }

    /// Kahn's algorithm, keeping the longest distance from any source.
    fn longest_path_depths(adj: &[Vec<usize>]) -> Vec<usize> {
        let n = adj.len();
        let mut in_degree = vec![0usize; n];
        for targets in adj {
            for &to in targets {
                in_degree[to] += 1;
            }
        }

        let mut depth = vec![0usize; n];
        let mut queue: VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut processed = 0;
        while let Some(node) = queue.pop_front() {
            processed += 1;
            for &next in &adj[node] {
                depth[next] = depth[next].max(depth[node] + 1);
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    queue.push_back(next);
                }
            }
        }

        // The graph is acyclic by construction; anything left over goes last.
        if processed < n {
            let max_depth = depth.iter().copied().max().unwrap_or(0);
            for i in 0..n {
                if in_degree[i] > 0 {
                    depth[i] = max_depth + 1;
                }
            }
        }

        depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::computation::BuiltinStep;
    use crate::engine::slot::Role;
    use crate::engine::step::Step;
    use crate::engine::steps::{ConstantStep, GainStep, SumStep};

    fn constant(name: &str) -> Arc<Step> {
        Step::builtin(name, BuiltinStep::Constant(ConstantStep::new(1.0))).unwrap()
    }

    fn gain(name: &str) -> Arc<Step> {
        Step::builtin(name, BuiltinStep::Gain(GainStep::new(1.0))).unwrap()
    }

    fn roots(steps: &[&Arc<Step>]) -> Vec<Arc<dyn Triggerable>> {
        steps
            .iter()
            .map(|s| (*s).clone() as Arc<dyn Triggerable>)
            .collect()
    }

    #[test]
    fn test_empty_plan() {
        let plan = CascadeCompiler::compile(&[]);
        assert!(plan.is_empty());
        assert!(plan.order().is_empty());
    }

    #[test]
    fn test_data_edges_order_roots() {
        let a = constant("a");
        let b = gain("b");
        b.connect_input("in", &a, Role::Output, "out").unwrap();
        // Attached in reverse order on purpose.
        let plan = CascadeCompiler::compile(&roots(&[&b, &a]));
        let order = plan.order();
        assert_eq!(order.depth_of(a.id()), Some(0));
        assert_eq!(order.depth_of(b.id()), Some(1));
        assert!(plan.entries.iter().all(|e| e.root));
        assert_eq!(plan.stats.data_edges, 1);
    }

    #[test]
    fn test_chain_reaches_listeners() {
        let a = constant("a");
        let b = gain("b");
        let c = gain("c");
        a.finished().connect(&b);
        b.finished().connect(&c);
        let plan = CascadeCompiler::compile(&roots(&[&a]));
        assert_eq!(plan.order().flatten(), vec![a.id(), b.id(), c.id()]);
        assert!(!plan.entries[1].root);
        assert_eq!(plan.entries[1].chain_preds, vec![0]);
        assert_eq!(plan.entries[2].chain_preds, vec![1]);
    }

    #[test]
    fn test_diamond_runs_each_node_once() {
        let a = constant("a");
        let b = gain("b");
        let c = gain("c");
        let d = Step::builtin("d", BuiltinStep::Sum(SumStep::new())).unwrap();
        b.connect_input("in", &a, Role::Output, "out").unwrap();
        c.connect_input("in", &a, Role::Output, "out").unwrap();
        d.connect_input("a", &b, Role::Output, "out").unwrap();
        d.connect_input("b", &c, Role::Output, "out").unwrap();
        for s in [&b, &c] {
            a.finished().connect(s);
            s.finished().connect(&d);
        }
        let plan = CascadeCompiler::compile(&roots(&[&a]));
        assert_eq!(plan.entries.len(), 4);
        let order = plan.order();
        assert_eq!(order.depth_of(d.id()), Some(2));
        assert_eq!(plan.stats.chain_edges, 4);
    }

    #[test]
    fn test_chain_cycle_dropped_and_reported() {
        let s4 = constant("s4");
        let s5 = gain("s5");
        s4.finished().connect(&s5);
        s5.finished().connect(&s4);
        let plan = CascadeCompiler::compile(&roots(&[&s4]));
        assert_eq!(plan.entries.len(), 2);
        assert_eq!(
            plan.cycles,
            vec![ChainCycle {
                from: "s5".to_string(),
                to: "s4".to_string()
            }]
        );
        assert!(matches!(
            plan.errors()[0],
            EngineError::TriggerCycle { .. }
        ));
        assert_eq!(plan.order().depth_of(s5.id()), Some(1));
    }

    #[test]
    fn test_self_chain_is_a_cycle() {
        let a = constant("a");
        a.finished().connect(&a);
        let plan = CascadeCompiler::compile(&roots(&[&a]));
        assert_eq!(plan.cycles.len(), 1);
        assert_eq!(plan.entries.len(), 1);
    }

    #[test]
    fn test_feedback_data_edge_ignored() {
        let a = gain("a");
        let b = gain("b");
        b.connect_input("in", &a, Role::Output, "out").unwrap();
        a.connect_input("in", &b, Role::Output, "out").unwrap();
        let plan = CascadeCompiler::compile(&roots(&[&a, &b]));
        assert_eq!(plan.stats.data_edges, 1);
        assert_eq!(plan.stats.feedback_edges, 1);
        // a's inputs are seen first, so b -> a wins and a -> b is feedback.
        assert_eq!(plan.order().depth_of(b.id()), Some(0));
        assert_eq!(plan.order().depth_of(a.id()), Some(1));
    }

    #[test]
    fn test_duplicate_roots_are_planned_once() {
        let a = constant("a");
        let plan = CascadeCompiler::compile(&roots(&[&a, &a]));
        assert_eq!(plan.entries.len(), 1);
    }
}
