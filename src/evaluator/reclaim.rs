//! Freeing expression graphs.
//!
//! Values share structure through `Rc`, and a chain of cells, closures or
//! scopes can be as long as a tail-recursive program cares to make it. The
//! `Drop` impls of those nodes therefore never drop their children in place:
//! they hand them to [`reclaim`], which frees the whole graph from an
//! explicit worklist.
//!
//! `letrec` adds reference cycles on top: a closure bound by `letrec`
//! captures the environment holding its own frame. [`collect_cycles`] traces
//! the graph below a set of such frames and releases the ones that nothing
//! outside that graph refers to any more.

use std::collections::HashMap;
use std::mem;
use std::rc::Rc;

use super::environment::{Environment, Frame, Scope};
use crate::ast::{Closure, Expr, Pair};

/// Something whose last owner may be going away
pub(crate) enum Garbage {
    Expr(Expr),
    Env(Environment),
    Frame(Rc<Frame>),
}

/// Whether dropping `expr` would free a cell or closure
pub(crate) fn sole_owner(expr: &Expr) -> bool {
    match expr {
        Expr::Pair(cell) => Rc::strong_count(cell) == 1,
        Expr::Closure(closure) => Rc::strong_count(closure) == 1,
        _ => false,
    }
}

/// Drop values without recursing on the call stack.
///
/// A node shared with someone else only loses a reference. A node this was
/// the last owner of has its children moved onto the worklist before it is
/// dropped, so its own `Drop` finds nothing left to do.
pub(crate) fn reclaim<I>(items: I)
where
    I: IntoIterator<Item = Garbage>,
{
    let mut pending: Vec<Garbage> = items.into_iter().collect();
    while let Some(item) = pending.pop() {
        match item {
            Garbage::Expr(Expr::Pair(cell)) => {
                if let Ok(mut pair) = Rc::try_unwrap(cell) {
                    let (head, tail) = pair.take_parts();
                    pending.push(Garbage::Expr(head));
                    pending.push(Garbage::Expr(tail));
                }
            }
            Garbage::Expr(Expr::Closure(closure)) => {
                if let Ok(mut closure) = Rc::try_unwrap(closure) {
                    let (body, env) = closure.take_parts();
                    pending.push(Garbage::Expr(body));
                    pending.push(Garbage::Env(env));
                }
            }
            Garbage::Expr(_) => {}
            Garbage::Env(mut env) => {
                if let Some(scope) = env.innermost.take()
                    && let Ok(mut scope) = Rc::try_unwrap(scope)
                {
                    pending.push(Garbage::Frame(Rc::clone(&scope.frame)));
                    pending.push(Garbage::Env(mem::take(&mut scope.parent)));
                }
            }
            Garbage::Frame(frame) => {
                if let Ok(mut frame) = Rc::try_unwrap(frame) {
                    pending.extend(frame.take_values().into_iter().map(Garbage::Expr));
                }
            }
        }
    }
}

/// A shared node met while tracing. Holding it keeps it alive until the
/// trace is dropped.
enum Node {
    Frame(Rc<Frame>),
    Scope(Rc<Scope>),
    Closure(Rc<Closure>),
    Pair(Rc<Pair>),
}

impl Node {
    fn from_expr(expr: &Expr) -> Option<Node> {
        match expr {
            Expr::Pair(cell) => Some(Node::Pair(Rc::clone(cell))),
            Expr::Closure(closure) => Some(Node::Closure(Rc::clone(closure))),
            _ => None,
        }
    }

    fn from_env(env: &Environment) -> Option<Node> {
        env.innermost.clone().map(Node::Scope)
    }

    fn id(&self) -> *const () {
        match self {
            Node::Frame(frame) => Rc::as_ptr(frame).cast(),
            Node::Scope(scope) => Rc::as_ptr(scope).cast(),
            Node::Closure(closure) => Rc::as_ptr(closure).cast(),
            Node::Pair(cell) => Rc::as_ptr(cell).cast(),
        }
    }

    fn strong_count(&self) -> usize {
        match self {
            Node::Frame(frame) => Rc::strong_count(frame),
            Node::Scope(scope) => Rc::strong_count(scope),
            Node::Closure(closure) => Rc::strong_count(closure),
            Node::Pair(cell) => Rc::strong_count(cell),
        }
    }

    /// The nodes this one refers to directly, one entry per reference
    fn children(&self) -> Vec<Node> {
        match self {
            Node::Frame(frame) => frame.values().iter().filter_map(Node::from_expr).collect(),
            Node::Scope(scope) => std::iter::once(Node::Frame(Rc::clone(&scope.frame)))
                .chain(Node::from_env(&scope.parent))
                .collect(),
            Node::Closure(closure) => Node::from_env(&closure.env).into_iter().collect(),
            Node::Pair(cell) => [cell.head(), cell.tail()]
                .into_iter()
                .filter_map(Node::from_expr)
                .collect(),
        }
    }
}

/// Every node reachable from the traced frames, with the references among
/// them
#[derive(Default)]
struct Trace {
    index: HashMap<*const (), usize>,
    nodes: Vec<Node>,
    /// References held by other traced nodes
    internal: Vec<usize>,
    edges: Vec<Vec<usize>>,
}

impl Trace {
    /// Index of `node`, and whether it was seen for the first time
    fn insert(&mut self, node: Node) -> (usize, bool) {
        if let Some(&index) = self.index.get(&node.id()) {
            return (index, false);
        }
        let index = self.nodes.len();
        self.index.insert(node.id(), index);
        self.nodes.push(node);
        self.internal.push(0);
        self.edges.push(Vec::new());
        (index, true)
    }

    fn build(frames: &[Rc<Frame>]) -> Trace {
        let mut trace = Trace::default();
        let mut pending = Vec::new();
        for frame in frames {
            let (index, _) = trace.insert(Node::Frame(Rc::clone(frame)));
            // The candidate list's own reference
            trace.internal[index] += 1;
            pending.push(index);
        }

        while let Some(index) = pending.pop() {
            for child in trace.nodes[index].children() {
                let (child_index, first_visit) = trace.insert(child);
                trace.internal[child_index] += 1;
                trace.edges[index].push(child_index);
                if first_visit {
                    pending.push(child_index);
                }
            }
        }
        trace
    }

    /// Nodes referenced from outside the trace, and everything they reach
    fn live(&self) -> Vec<bool> {
        // One reference per node is the trace's own
        let mut pending: Vec<usize> = (0..self.nodes.len())
            .filter(|&index| self.nodes[index].strong_count() > self.internal[index] + 1)
            .collect();
        let mut live = vec![false; self.nodes.len()];
        while let Some(index) = pending.pop() {
            if !live[index] {
                live[index] = true;
                pending.extend(self.edges[index].iter().copied());
            }
        }
        live
    }
}

/// Release the frames in `frames` that are only reachable through
/// reference cycles among themselves, and stop tracking them. Returns how
/// many were released.
///
/// A frame still reachable from anything outside the traced graph (an
/// environment or value held by a running evaluation, a result handed back
/// to the caller) is kept.
pub(crate) fn collect_cycles(frames: &mut Vec<Rc<Frame>>) -> usize {
    if frames.is_empty() {
        return 0;
    }

    let trace = Trace::build(frames);
    let live = trace.live();
    // Candidates were inserted first, in order
    let mut still_live = live[..frames.len()].iter();
    let (kept, dead): (Vec<_>, Vec<_>) = mem::take(frames)
        .into_iter()
        .partition(|_| still_live.next().copied().unwrap_or(true));
    drop(trace);

    *frames = kept;
    for frame in &dead {
        frame.release();
    }
    dead.len()
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ast::{nil, val};

    /// A frame binding `f` to a closure that captured the frame itself,
    /// optionally wrapped in a one-element list
    fn self_referencing_frame(in_list: bool) -> (Rc<Frame>, Expr) {
        let frame = Frame::open();
        let env = Environment::empty().extend_with(Rc::clone(&frame));
        let closure = Expr::Closure(Rc::new(Closure {
            params: Vec::new(),
            body: nil(),
            env,
        }));
        let value = if in_list {
            Expr::cons(closure.clone(), nil())
        } else {
            closure.clone()
        };
        frame.close(vec![Rc::from("f")], vec![value]).unwrap();
        (frame, closure)
    }

    #[test]
    fn test_reclaim_long_chains() {
        let mut nested = nil();
        for _ in 0..100_000 {
            nested = Expr::cons(nested, val(1));
        }
        let mut env = Environment::empty();
        for i in 0..100_000 {
            env = env.extend(vec![Rc::from("x")], vec![val(i)]).unwrap();
        }
        reclaim([Garbage::Expr(nested), Garbage::Env(env)]);
    }

    #[test]
    fn test_cycle_kept_while_referenced() {
        for in_list in [false, true] {
            let (frame, closure) = self_referencing_frame(in_list);
            let weak_frame = Rc::downgrade(&frame);
            let Expr::Closure(rc) = &closure else {
                panic!("expected a closure");
            };
            let weak_closure = Rc::downgrade(rc);
            let mut frames = vec![frame];

            assert_eq!(collect_cycles(&mut frames), 0, "in_list = {in_list}");
            assert_eq!(frames.len(), 1);
            assert!(frames[0].is_closed());

            drop(closure);
            assert_eq!(collect_cycles(&mut frames), 1, "in_list = {in_list}");
            assert!(frames.is_empty());
            assert!(weak_frame.upgrade().is_none());
            assert!(weak_closure.upgrade().is_none());
        }
    }

    #[test]
    fn test_environment_keeps_cycle_alive() {
        let (frame, closure) = self_referencing_frame(false);
        drop(closure);
        let env = Environment::empty().extend_with(Rc::clone(&frame));
        let mut frames = vec![frame];

        assert_eq!(collect_cycles(&mut frames), 0);
        assert!(env.lookup("f").is_ok());

        drop(env);
        assert_eq!(collect_cycles(&mut frames), 1);
    }

    #[test]
    fn test_repeated_bindings_counted_once_each() {
        let frame = Frame::open();
        let env = Environment::empty().extend_with(Rc::clone(&frame));
        let closure = Expr::Closure(Rc::new(Closure {
            params: Vec::new(),
            body: nil(),
            env,
        }));
        frame
            .close(
                vec![Rc::from("f"), Rc::from("g")],
                vec![closure.clone(), closure],
            )
            .unwrap();
        let weak_frame = Rc::downgrade(&frame);
        let mut frames = vec![frame];

        assert_eq!(collect_cycles(&mut frames), 1);
        assert!(weak_frame.upgrade().is_none());
    }
}
