//! Single-response-write checker.
//!
//! Builds a control-flow graph of a handler body and walks it with an
//! explicit worklist of `(block, state)` pairs, where the state records the
//! last response write on the path so far. A write reachable after another
//! write is reported.
//!
//! Writes whose result is assigned (`err := jc.Decode(&v)`) or compared
//! directly (`jc.Check(msg, err) != nil`) are resolved at the next branch:
//! the `!= nil` side has written the error response, the other has not.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use std::collections::{HashSet, VecDeque};
use tracing::debug;
use tree_sitter::Node;

use super::diagnostics::Reporter;
use super::server::{context_call, Handler};
use crate::parser::{
    expression_list, field_children, inspect, named_children, statements, unparen, DeclIndex,
    SourceFile, Typer,
};

// ─── Control-Flow Graph ─────────────────────────────────────

/// Edge label: taken unconditionally, or on one side of an `if`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Branch {
    Always,
    Then,
    Else,
}

/// Straight-line code, optionally ending in an `if` condition.
#[derive(Debug, Default)]
pub struct Block<'a> {
    pub items: Vec<Node<'a>>,
    pub cond: Option<Node<'a>>,
}

/// Control-flow graph of one function body.
pub struct Cfg<'a> {
    pub graph: DiGraph<Block<'a>, Branch>,
    pub entry: NodeIndex,
    pub exit: NodeIndex,
}

impl<'a> Cfg<'a> {
    /// Build the graph of a `block` node.
    pub fn build(source: &SourceFile, body: Node<'a>) -> Self {
        let mut builder = Builder {
            source,
            graph: DiGraph::new(),
            targets: Vec::new(),
            exit: NodeIndex::end(),
        };
        let entry = builder.block();
        builder.exit = builder.block();
        let end = builder.stmts(&statements(body), entry);
        builder.edge(end, builder.exit, Branch::Always);
        Cfg {
            graph: builder.graph,
            entry,
            exit: builder.exit,
        }
    }
}

/// Where `break` / `continue` go inside a loop, switch or select.
struct Target {
    label: Option<String>,
    break_to: NodeIndex,
    continue_to: Option<NodeIndex>,
}

struct Builder<'s, 'a> {
    source: &'s SourceFile,
    graph: DiGraph<Block<'a>, Branch>,
    targets: Vec<Target>,
    exit: NodeIndex,
}

impl<'s, 'a> Builder<'s, 'a> {
    fn block(&mut self) -> NodeIndex {
        self.graph.add_node(Block::default())
    }

    fn edge(&mut self, from: NodeIndex, to: NodeIndex, branch: Branch) {
        self.graph.add_edge(from, to, branch);
    }

    fn push(&mut self, block: NodeIndex, node: Node<'a>) {
        self.graph[block].items.push(node);
    }

    /// Block that follows a jump; only reachable if something jumps to it.
    fn dead(&mut self) -> NodeIndex {
        self.block()
    }

    fn stmts(&mut self, nodes: &[Node<'a>], mut cur: NodeIndex) -> NodeIndex {
        for &node in nodes {
            cur = self.stmt(node, cur, None);
        }
        cur
    }

    fn stmt(&mut self, node: Node<'a>, cur: NodeIndex, label: Option<String>) -> NodeIndex {
        match node.kind() {
            "block" => self.stmts(&statements(node), cur),
            "if_statement" => self.if_stmt(node, cur),
            "for_statement" => self.for_stmt(node, cur, label),
            "expression_switch_statement" | "type_switch_statement" | "select_statement" => {
                self.switch_stmt(node, cur, label)
            }
            "labeled_statement" => {
                let name = node
                    .child_by_field_name("label")
                    .map(|l| self.source.text(l).to_string());
                let inner: Vec<Node<'a>> = named_children(node)
                    .into_iter()
                    .filter(|n| n.kind() != "label_name")
                    .collect();
                match inner.first() {
                    Some(&stmt) => self.stmt(stmt, cur, name),
                    None => cur,
                }
            }
            "return_statement" => {
                self.push(cur, node);
                self.edge(cur, self.exit, Branch::Always);
                self.dead()
            }
            "goto_statement" => {
                // targets are not modeled; the path ends here
                self.edge(cur, self.exit, Branch::Always);
                self.dead()
            }
            "break_statement" | "continue_statement" => self.jump(node, cur),
            "expression_statement" if self.is_panic(node) => {
                self.push(cur, node);
                self.edge(cur, self.exit, Branch::Always);
                self.dead()
            }
            "defer_statement" | "go_statement" | "empty_statement" | "fallthrough_statement" => cur,
            _ => {
                self.push(cur, node);
                cur
            }
        }
    }

    fn if_stmt(&mut self, node: Node<'a>, cur: NodeIndex) -> NodeIndex {
        if let Some(init) = node.child_by_field_name("initializer") {
            self.push(cur, init);
        }
        self.graph[cur].cond = node.child_by_field_name("condition");

        let join = self.block();
        let then_block = self.block();
        self.edge(cur, then_block, Branch::Then);
        let then_end = match node.child_by_field_name("consequence") {
            Some(body) => self.stmt(body, then_block, None),
            None => then_block,
        };
        self.edge(then_end, join, Branch::Always);

        match node.child_by_field_name("alternative") {
            Some(alt) => {
                let else_block = self.block();
                self.edge(cur, else_block, Branch::Else);
                let else_end = self.stmt(alt, else_block, None);
                self.edge(else_end, join, Branch::Always);
            }
            None => self.edge(cur, join, Branch::Else),
        }
        join
    }

    fn for_stmt(&mut self, node: Node<'a>, cur: NodeIndex, label: Option<String>) -> NodeIndex {
        let body = node.child_by_field_name("body");
        let header = self.block();
        let after = self.block();
        let next = self.block();
        let mut update = None;
        let mut bounded = false;
        for child in named_children(node) {
            if Some(child) == body {
                continue;
            }
            match child.kind() {
                "for_clause" => {
                    if let Some(init) = child.child_by_field_name("initializer") {
                        self.push(cur, init);
                    }
                    if let Some(cond) = child.child_by_field_name("condition") {
                        self.push(header, cond);
                        bounded = true;
                    }
                    update = child.child_by_field_name("update");
                }
                "range_clause" => {
                    self.push(cur, child);
                    bounded = true;
                }
                _ => {
                    self.push(header, child);
                    bounded = true;
                }
            }
        }
        self.edge(cur, header, Branch::Always);
        if bounded {
            self.edge(header, after, Branch::Always);
        }

        let body_block = self.block();
        self.edge(header, body_block, Branch::Always);
        self.targets.push(Target {
            label,
            break_to: after,
            continue_to: Some(next),
        });
        let end = match body {
            Some(body) => self.stmt(body, body_block, None),
            None => body_block,
        };
        self.targets.pop();

        self.edge(end, next, Branch::Always);
        if let Some(update) = update {
            self.push(next, update);
        }
        self.edge(next, header, Branch::Always);
        after
    }

    fn switch_stmt(&mut self, node: Node<'a>, cur: NodeIndex, label: Option<String>) -> NodeIndex {
        let after = self.block();
        let mut cases = Vec::new();
        for child in named_children(node) {
            match child.kind() {
                "expression_case" | "default_case" | "type_case" | "communication_case" => {
                    cases.push(child)
                }
                _ => self.push(cur, child),
            }
        }

        self.targets.push(Target {
            label,
            break_to: after,
            continue_to: None,
        });
        let mut has_default = false;
        let mut fallthrough: Option<NodeIndex> = None;
        for case in cases {
            has_default |= case.kind() == "default_case";
            let block = self.block();
            self.edge(cur, block, Branch::Always);
            if let Some(prev) = fallthrough.take() {
                self.edge(prev, block, Branch::Always);
            }
            let mut header = field_children(case, "value");
            header.extend(field_children(case, "type"));
            header.extend(field_children(case, "communication"));
            for &expr in &header {
                self.push(block, expr);
            }
            let body: Vec<Node<'a>> = statements(case)
                .into_iter()
                .filter(|n| !header.contains(n))
                .collect();
            let end = self.stmts(&body, block);
            if body.last().is_some_and(|n| n.kind() == "fallthrough_statement") {
                fallthrough = Some(end);
            } else {
                self.edge(end, after, Branch::Always);
            }
        }
        self.targets.pop();

        // a select without default blocks until a case runs
        if !has_default && node.kind() != "select_statement" {
            self.edge(cur, after, Branch::Always);
        }
        after
    }

    fn jump(&mut self, node: Node<'a>, cur: NodeIndex) -> NodeIndex {
        let is_break = node.kind() == "break_statement";
        let label = named_children(node)
            .into_iter()
            .next()
            .map(|l| self.source.text(l).to_string());
        let target = self.targets.iter().rev().find(|t| match &label {
            Some(name) => t.label.as_deref() == Some(name.as_str()),
            None => is_break || t.continue_to.is_some(),
        });
        let dest = target.and_then(|t| if is_break { Some(t.break_to) } else { t.continue_to });
        match dest {
            Some(dest) => self.edge(cur, dest, Branch::Always),
            None => debug!(stmt = self.source.text(node), "jump without target"),
        }
        self.dead()
    }

    fn is_panic(&self, node: Node<'_>) -> bool {
        named_children(node)
            .first()
            .filter(|call| call.kind() == "call_expression")
            .and_then(|call| call.child_by_field_name("function"))
            .is_some_and(|func| func.kind() == "identifier" && self.source.text(func) == "panic")
    }
}

// ─── Write Tracking ─────────────────────────────────────────

/// Line and column of a write call.
type Site = (usize, usize);

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
struct FlowState {
    /// Last write on this path.
    wrote: Option<Site>,
    /// Variable holding the result of a write, and that write's site.
    pending: Option<(String, Site)>,
}

/// Check one handler for paths that write two responses.
pub fn check_handler<'a>(
    index: &DeclIndex<'a>,
    handler: &Handler<'a>,
    jape: &str,
    reporter: &mut Reporter,
) {
    let typer = Typer::enclosing(index, handler.file, handler.node);
    let cfg = Cfg::build(typer.source(), handler.body);
    let mut checker = FlowChecker {
        typer: &typer,
        jape,
        reporter,
    };
    checker.run(&cfg);
}

struct FlowChecker<'t, 'i, 'a, 'r> {
    typer: &'t Typer<'i, 'a>,
    jape: &'r str,
    reporter: &'r mut Reporter,
}

/// One comparison of a write result against nil.
struct NilCheck {
    equal: bool,
    site: Site,
}

impl<'t, 'i, 'a, 'r> FlowChecker<'t, 'i, 'a, 'r> {
    fn run(&mut self, cfg: &Cfg<'a>) {
        let mut queue = VecDeque::from([(cfg.entry, FlowState::default())]);
        let mut visited: HashSet<(NodeIndex, FlowState)> = HashSet::new();
        while let Some((block, state)) = queue.pop_front() {
            if !visited.insert((block, state.clone())) {
                continue;
            }
            let mut state = state;
            let data = &cfg.graph[block];
            for &item in &data.items {
                self.item(item, &mut state);
            }
            let (then_state, else_state) = match data.cond {
                Some(cond) => self.branch(cond, state.clone()),
                None => (state.clone(), state.clone()),
            };
            for edge in cfg.graph.edges(block) {
                let next = match edge.weight() {
                    Branch::Always => state.clone(),
                    Branch::Then => then_state.clone(),
                    Branch::Else => else_state.clone(),
                };
                queue.push_back((edge.target(), next));
            }
        }
        debug!(states = visited.len(), "handler flow checked");
    }

    fn site(&self, node: Node<'_>) -> Site {
        let point = node.start_position();
        (point.row + 1, point.column + 1)
    }

    fn is_write(&self, node: Node<'a>) -> bool {
        context_call(self.typer, node, self.jape).is_some_and(|c| c.op.is_write())
    }

    /// Write calls under `node`, in source order, outside closures.
    fn writes(&self, node: Node<'a>) -> Vec<Node<'a>> {
        let mut out = Vec::new();
        inspect(node, |n| {
            if n.kind() == "func_literal" {
                return false;
            }
            if self.is_write(n) {
                out.push(n);
            }
            true
        });
        out
    }

    fn record_write(&mut self, call: Node<'_>, state: &mut FlowState) {
        let site = self.site(call);
        self.check_previous(call, state);
        state.wrote = Some(site);
    }

    fn check_previous(&mut self, call: Node<'_>, state: &FlowState) {
        if let Some((line, column)) = state.wrote {
            self.reporter.report(
                self.typer.source().position(call),
                format!(
                    "handler writes multiple responses (previous write at {}:{})",
                    line, column
                ),
            );
        }
    }

    fn item(&mut self, node: Node<'a>, state: &mut FlowState) {
        if matches!(node.kind(), "short_var_declaration" | "assignment_statement") {
            let (Some(left), Some(right)) = (
                node.child_by_field_name("left"),
                node.child_by_field_name("right"),
            ) else {
                return;
            };
            let names = expression_list(left);
            let values = expression_list(right);
            if let ([name], [value]) = (&names[..], &values[..]) {
                let value = unparen(*value);
                let var = self.typer.text(*name);
                if name.kind() == "identifier" && var != "_" && self.is_write(value) {
                    self.check_previous(value, state);
                    state.pending = Some((var.to_string(), self.site(value)));
                    return;
                }
            }
            for call in self.writes(right) {
                self.record_write(call, state);
            }
            let reassigned = state
                .pending
                .as_ref()
                .is_some_and(|(var, _)| names.iter().any(|n| self.typer.text(*n) == var.as_str()));
            if reassigned {
                state.pending = None;
            }
            return;
        }
        for call in self.writes(node) {
            self.record_write(call, state);
        }
    }

    /// States for the then and else successors of an `if` on `cond`.
    fn branch(&mut self, cond: Node<'a>, mut state: FlowState) -> (FlowState, FlowState) {
        let mut ops = Vec::new();
        let mut leaves = Vec::new();
        self.flatten(cond, &mut ops, &mut leaves);

        let mut checks = Vec::new();
        let mut others = false;
        for &leaf in &leaves {
            match self.nil_check(leaf, &state) {
                Some(check) => checks.push(check),
                None => {
                    others = true;
                    for call in self.writes(leaf) {
                        self.record_write(call, &mut state);
                    }
                }
            }
        }
        if checks.is_empty() {
            return (state.clone(), state);
        }

        let site = checks[0].site;
        state.pending = None;
        let conjunction = !others
            && checks.iter().all(|c| c.equal)
            && ops.iter().all(|op| *op == "&&");
        let disjunction = !others
            && checks.iter().all(|c| !c.equal)
            && ops.iter().all(|op| *op == "||");
        let wrote = FlowState {
            wrote: Some(site),
            pending: None,
        };
        if conjunction {
            (state, wrote)
        } else if disjunction {
            (wrote, state)
        } else {
            self.reporter.report(
                self.typer.source().position(cond),
                "weird condition; stick to a single conjunction/disjunction form",
            );
            (state.clone(), state)
        }
    }

    /// Split a condition into the leaves of its `&&` / `||` tree.
    fn flatten(&self, node: Node<'a>, ops: &mut Vec<&'a str>, leaves: &mut Vec<Node<'a>>) {
        let node = unparen(node);
        if node.kind() == "binary_expression" {
            let op = node.child_by_field_name("operator").map(|o| self.typer.text(o));
            if let (Some(op @ ("&&" | "||")), Some(left), Some(right)) = (
                op,
                node.child_by_field_name("left"),
                node.child_by_field_name("right"),
            ) {
                ops.push(op);
                self.flatten(left, ops, leaves);
                self.flatten(right, ops, leaves);
                return;
            }
        }
        leaves.push(node);
    }

    /// Recognize `x == nil` / `x != nil` where `x` is a pending write result
    /// or a write call. A write call here is checked against earlier writes.
    fn nil_check(&mut self, leaf: Node<'a>, state: &FlowState) -> Option<NilCheck> {
        if leaf.kind() != "binary_expression" {
            return None;
        }
        let op = self.typer.text(leaf.child_by_field_name("operator")?);
        let equal = match op {
            "==" => true,
            "!=" => false,
            _ => return None,
        };
        let left = unparen(leaf.child_by_field_name("left")?);
        let right = unparen(leaf.child_by_field_name("right")?);
        let subject = match (left.kind(), right.kind()) {
            (_, "nil") => left,
            ("nil", _) => right,
            _ => return None,
        };
        if self.is_write(subject) {
            self.check_previous(subject, state);
            return Some(NilCheck {
                equal,
                site: self.site(subject),
            });
        }
        match &state.pending {
            Some((var, site))
                if subject.kind() == "identifier" && self.typer.text(subject) == var.as_str() =>
            {
                Some(NilCheck { equal, site: *site })
            }
            _ => None,
        }
    }
}
