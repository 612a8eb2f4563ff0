//! A scheduled broadcast: a window with a title.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::node::{Entity, Node};
use crate::schedule::Windowed;
use crate::window::Window;

pub const PROP_TITLE: &str = "title";
pub const PROP_COMMENT: &str = "comment";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ProgramStatus {
    Unknown = 0,
    Previous = 1,
    Current = 2,
    Future = 3,
}

impl ProgramStatus {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Self {
        match code {
            1 => Self::Previous,
            2 => Self::Current,
            3 => Self::Future,
            _ => Self::Unknown,
        }
    }

    /// Status is a pure function of the window and the clock.
    pub fn at(window: Option<Window>, now: DateTime<Utc>) -> Self {
        match window {
            None => Self::Unknown,
            Some(w) if now >= w.finish => Self::Previous,
            Some(w) if now >= w.start => Self::Current,
            Some(_) => Self::Future,
        }
    }
}

#[derive(Debug)]
pub struct Program {
    node: Node,
}

impl Program {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { node: Node::new() })
    }

    pub fn scheduled(window: Window, title: &str, comment: &str) -> Arc<Self> {
        let node = Node::with_properties([(PROP_TITLE, title), (PROP_COMMENT, comment)]);
        window.write(&node);
        Arc::new(Self { node })
    }

    pub fn from_properties<I, K, V>(props: I) -> Arc<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Arc::new(Self {
            node: Node::with_properties(props),
        })
    }

    pub fn title(&self) -> String {
        self.node.text(PROP_TITLE)
    }

    pub fn comment(&self) -> String {
        self.node.text(PROP_COMMENT)
    }

    pub fn status(&self) -> ProgramStatus {
        ProgramStatus::from_code(self.node.status())
    }
}

impl Windowed for Program {
    fn window(&self) -> Option<Window> {
        Window::read(&self.node)
    }
}

impl Entity for Program {
    fn node(&self) -> &Node {
        &self.node
    }

    fn update(&self, now: DateTime<Utc>) {
        let window = self.window();
        let status = ProgramStatus::at(window, now);
        self.node.set_status(status.code());
        match (status, window) {
            (ProgramStatus::Previous, _) => {
                self.node.set_progress(100);
                self.node.set_pending_removal(true);
            }
            (ProgramStatus::Current, Some(w)) => self.node.set_progress(w.progress(now)),
            (ProgramStatus::Future, _) => self.node.set_progress(0),
            _ => {}
        }
    }
}
