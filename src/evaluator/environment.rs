use std::cell::{Ref, RefCell};
use std::fmt;
use std::mem;
use std::rc::Rc;

use super::reclaim::{Garbage, reclaim, sole_owner};
use crate::Error;
use crate::ast::Expr;

// An environment is a chain of frames, innermost first. Frames hold two
// parallel sequences (names and values) and are shared by reference, so a
// closure that captured a frame sees whatever that frame ends up holding.
//
// `letrec` needs a frame that exists before its values do: it is opened
// empty, pushed onto the environment the binding expressions are evaluated
// in, and closed exactly once with the finished bindings. Nothing writes to
// a frame after it is closed.

/// Lifecycle of a frame's bindings
#[derive(Debug)]
enum FrameState {
    /// Created by `letrec`, bindings not yet known. Looks empty.
    Open,
    /// Bindings fixed
    Closed {
        names: Vec<Rc<str>>,
        values: Vec<Expr>,
    },
    /// Bindings dropped to break reference cycles. Looks empty.
    Released,
}

impl FrameState {
    fn values(&self) -> &[Expr] {
        match self {
            FrameState::Closed { values, .. } => values,
            FrameState::Open | FrameState::Released => &[],
        }
    }
}

/// One binding scope
#[derive(Debug)]
pub struct Frame {
    state: RefCell<FrameState>,
}

impl Frame {
    /// A frame whose bindings are supplied later through [`Frame::close`]
    pub fn open() -> Rc<Frame> {
        Rc::new(Frame {
            state: RefCell::new(FrameState::Open),
        })
    }

    /// A frame with its bindings already fixed
    pub fn closed(names: Vec<Rc<str>>, values: Vec<Expr>) -> Result<Rc<Frame>, Error> {
        check_lengths(&names, &values)?;
        Ok(Rc::new(Frame {
            state: RefCell::new(FrameState::Closed { names, values }),
        }))
    }

    /// Fix the bindings of an open frame. Environments and closures that
    /// already hold this frame observe the new bindings immediately.
    pub fn close(&self, names: Vec<Rc<str>>, values: Vec<Expr>) -> Result<(), Error> {
        check_lengths(&names, &values)?;
        let mut state = self.state.borrow_mut();
        match *state {
            FrameState::Open => {
                *state = FrameState::Closed { names, values };
                Ok(())
            }
            FrameState::Closed { .. } | FrameState::Released => Err(Error::EvalError(
                "frame bindings can only be fixed once".to_owned(),
            )),
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(*self.state.borrow(), FrameState::Closed { .. })
    }

    /// Drop the bindings. Used to reclaim `letrec` cycles once no more
    /// evaluation can reach them.
    pub(crate) fn release(&self) {
        // Move the values out first: dropping them may drop closures whose
        // environments point back at this frame.
        let old = mem::replace(&mut *self.state.borrow_mut(), FrameState::Released);
        if let FrameState::Closed { values, .. } = old {
            reclaim(values.into_iter().map(Garbage::Expr));
        }
    }

    /// Whether a bound value is a closure or a list that may hold one, i.e.
    /// whether this frame can be part of a reference cycle
    pub(crate) fn may_form_cycle(&self) -> bool {
        self.values()
            .iter()
            .any(|value| matches!(value, Expr::Closure(_) | Expr::Pair(_)))
    }

    /// The bound values, empty unless the frame is closed
    pub(crate) fn values(&self) -> Ref<'_, [Expr]> {
        Ref::map(self.state.borrow(), FrameState::values)
    }

    /// Move the values out of a frame about to be dropped
    pub(crate) fn take_values(&mut self) -> Vec<Expr> {
        match mem::replace(self.state.get_mut(), FrameState::Released) {
            FrameState::Closed { values, .. } => values,
            FrameState::Open | FrameState::Released => Vec::new(),
        }
    }

    /// First positional match, scanning names left to right
    fn get(&self, name: &str) -> Option<Expr> {
        match &*self.state.borrow() {
            FrameState::Closed { names, values } => names
                .iter()
                .position(|bound| &**bound == name)
                .map(|index| values[index].clone()),
            FrameState::Open | FrameState::Released => None,
        }
    }

    fn entries(&self) -> Vec<(Rc<str>, Expr)> {
        match &*self.state.borrow() {
            FrameState::Closed { names, values } => {
                names.iter().cloned().zip(values.iter().cloned()).collect()
            }
            FrameState::Open | FrameState::Released => Vec::new(),
        }
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        let values = self.take_values();
        if values.iter().any(sole_owner) {
            reclaim(values.into_iter().map(Garbage::Expr));
        }
    }
}

fn check_lengths(names: &[Rc<str>], values: &[Expr]) -> Result<(), Error> {
    if names.len() == values.len() {
        Ok(())
    } else {
        Err(Error::arity_error(names.len(), values.len()))
    }
}

pub(crate) struct Scope {
    pub(crate) frame: Rc<Frame>,
    pub(crate) parent: Environment,
}

// A scope that owned the rest of the chain would otherwise drop it one
// nested call per frame.
impl Drop for Scope {
    fn drop(&mut self) {
        if self.parent.sole_owner() {
            reclaim([Garbage::Env(mem::take(&mut self.parent))]);
        }
    }
}

/// Chain of frames, innermost first. Cloning shares the frames.
#[derive(Clone, Default)]
pub struct Environment {
    pub(crate) innermost: Option<Rc<Scope>>,
}

impl Environment {
    /// The environment with no frames
    pub fn empty() -> Self {
        Environment { innermost: None }
    }

    /// An environment of a single closed frame holding the given bindings
    pub fn from_bindings<I>(bindings: I) -> Self
    where
        I: IntoIterator<Item = (Rc<str>, Expr)>,
    {
        let (names, values) = bindings.into_iter().unzip();
        Environment::empty().extend_with(Rc::new(Frame {
            state: RefCell::new(FrameState::Closed { names, values }),
        }))
    }

    /// A new environment with one closed frame on top of this one
    pub fn extend(&self, names: Vec<Rc<str>>, values: Vec<Expr>) -> Result<Environment, Error> {
        Ok(self.extend_with(Frame::closed(names, values)?))
    }

    /// A new environment with the given (possibly still open) frame on top
    pub fn extend_with(&self, frame: Rc<Frame>) -> Environment {
        Environment {
            innermost: Some(Rc::new(Scope {
                frame,
                parent: self.clone(),
            })),
        }
    }

    /// Resolve a symbol, innermost frame first
    pub fn lookup(&self, name: &str) -> Result<Expr, Error> {
        let mut scope = self.innermost.as_deref();
        while let Some(current) = scope {
            if let Some(value) = current.frame.get(name) {
                return Ok(value);
            }
            scope = current.parent.innermost.as_deref();
        }
        Err(Error::UnboundIdentifier(name.to_owned()))
    }

    /// Whether dropping this environment would free its innermost scope
    pub(crate) fn sole_owner(&self) -> bool {
        self.innermost
            .as_ref()
            .is_some_and(|scope| Rc::strong_count(scope) == 1)
    }

    /// Number of frames in the chain
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut scope = self.innermost.as_deref();
        while let Some(current) = scope {
            depth += 1;
            scope = current.parent.innermost.as_deref();
        }
        depth
    }

    /// All visible bindings, shadowed ones removed, sorted by name
    pub fn bindings(&self) -> Vec<(Rc<str>, Expr)> {
        let mut visible: Vec<(Rc<str>, Expr)> = Vec::new();
        let mut scope = self.innermost.as_deref();
        while let Some(current) = scope {
            for (name, value) in current.frame.entries() {
                if !visible.iter().any(|(seen, _)| *seen == name) {
                    visible.push((name, value));
                }
            }
            scope = current.parent.innermost.as_deref();
        }
        visible.sort_by(|a, b| a.0.cmp(&b.0));
        visible
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("depth", &self.depth())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ast::{sym, val};

    fn names(list: &[&str]) -> Vec<Rc<str>> {
        list.iter().map(|name| Rc::from(*name)).collect()
    }

    #[test]
    fn test_empty_environment() {
        let env = Environment::empty();
        assert_eq!(env.depth(), 0);
        assert_eq!(
            env.lookup("x").unwrap_err(),
            Error::UnboundIdentifier("x".into())
        );
    }

    #[test]
    fn test_from_bindings() {
        let env = Environment::from_bindings([(Rc::from("x"), val(1)), (Rc::from("y"), sym("y"))]);
        assert_eq!(env.depth(), 1);
        assert_eq!(env.lookup("y").unwrap(), sym("y"));
    }

    #[test]
    fn test_shadowing() {
        let outer = Environment::empty()
            .extend(names(&["x", "y"]), vec![val(1), val(2)])
            .unwrap();
        let inner = outer.extend(names(&["x"]), vec![val(10)]).unwrap();

        assert_eq!(inner.lookup("x").unwrap(), val(10));
        assert_eq!(inner.lookup("y").unwrap(), val(2));
        assert_eq!(outer.lookup("x").unwrap(), val(1));
        assert_eq!(inner.depth(), 2);
    }

    #[test]
    fn test_first_positional_match_wins() {
        let env = Environment::empty()
            .extend(names(&["a", "a"]), vec![val(1), val(2)])
            .unwrap();
        assert_eq!(env.lookup("a").unwrap(), val(1));
    }

    #[test]
    fn test_unequal_lengths_rejected() {
        let result = Environment::empty().extend(names(&["a", "b"]), vec![val(1)]);
        assert_eq!(result.unwrap_err(), Error::arity_error(2, 1));

        let frame = Frame::open();
        assert!(frame.close(names(&["a"]), vec![]).is_err());
        assert!(!frame.is_closed());
    }

    #[test]
    fn test_open_frame_visible_after_close() {
        let outer = Environment::empty()
            .extend(names(&["x"]), vec![val(1)])
            .unwrap();
        let frame = Frame::open();
        let env = outer.extend_with(frame.clone());

        // An open frame is transparent
        assert_eq!(env.lookup("x").unwrap(), val(1));
        assert!(env.lookup("y").is_err());

        frame
            .close(names(&["x", "y"]), vec![sym("inner"), val(2)])
            .unwrap();
        assert!(frame.is_closed());
        assert_eq!(env.lookup("x").unwrap(), sym("inner"));
        assert_eq!(env.lookup("y").unwrap(), val(2));
    }

    #[test]
    fn test_frame_closes_once() {
        let frame = Frame::open();
        frame.close(names(&["a"]), vec![val(1)]).unwrap();
        assert!(matches!(
            frame.close(names(&["a"]), vec![val(2)]),
            Err(Error::EvalError(_))
        ));
    }

    #[test]
    fn test_release() {
        let frame = Frame::open();
        let env = Environment::empty().extend_with(frame.clone());
        frame.close(names(&["a"]), vec![val(1)]).unwrap();
        assert!(!frame.may_form_cycle());

        frame.release();
        assert!(env.lookup("a").is_err());
        assert!(!frame.is_closed());
    }

    #[test]
    fn test_values_that_may_form_cycles() {
        let cases = vec![
            (vec![val(1), sym("a")], false),
            (vec![], false),
            (vec![val([1, 2])], true),
            (vec![val(1), Expr::cons(sym("a"), sym("b"))], true),
        ];
        for (values, expected) in cases {
            let labels: Vec<String> = (0..values.len()).map(|i| format!("v{i}")).collect();
            let labels: Vec<&str> = labels.iter().map(String::as_str).collect();
            let frame = Frame::closed(names(&labels), values).unwrap();
            assert_eq!(frame.may_form_cycle(), expected, "{:?}", frame.values());
        }
        assert!(!Frame::open().may_form_cycle());
    }

    #[test]
    fn test_long_chain_drops_iteratively() {
        let mut env = Environment::empty();
        for i in 0..100_000 {
            env = env.extend(names(&["i"]), vec![val(i)]).unwrap();
        }
        assert_eq!(env.depth(), 100_000);
        assert_eq!(env.lookup("i").unwrap(), val(99_999));
        assert_eq!(format!("{env:?}"), "Environment { depth: 100000, .. }");
        drop(env);
    }

    #[test]
    fn test_bindings_listing() {
        let env = Environment::empty()
            .extend(names(&["b", "a"]), vec![val(1), val(2)])
            .unwrap()
            .extend(names(&["b"]), vec![val(3)])
            .unwrap();

        let listed: Vec<(String, Expr)> = env
            .bindings()
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect();
        assert_eq!(
            listed,
            vec![("a".to_owned(), val(2)), ("b".to_owned(), val(3))]
        );
    }
}
