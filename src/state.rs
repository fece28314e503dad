use std::fmt;

use hashbrown::HashMap as Map;
use serde_derive::{Deserialize, Serialize};

use crate::message::Operation;

/// Result of applying an operation to a node's store.
#[derive(Serialize, Deserialize)]
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Response {
    Stored { key: i32, value: f32 },
    Found { key: i32, value: f32 },
    Missing { key: i32 },
    Removed { key: i32 },
}

impl fmt::Display for Response {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
        | Response::Stored { key, value } => write!(fmt, "Successfully put key: {} Value: {}", key, value),
        | Response::Found { key, value } => write!(fmt, "Key: {} Value is: {}", key, value),
        | Response::Missing { key } => write!(fmt, "Key not found: {}", key),
        | Response::Removed { key } => write!(fmt, "Successfully removed key: {}", key),
        }
    }
}

/// State machine each node applies committed operations to.
pub trait State: Default + Send + 'static {
    fn execute(&mut self, operation: Operation) -> Response;
}

/// In-memory key-value store.
#[derive(Debug, Default)]
pub struct Store {
    map: Map<i32, f32>,
}

impl Store {
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl State for Store {
    fn execute(&mut self, operation: Operation) -> Response {
        match operation {
        | Operation::Put { key, value } => {
            self.map.insert(key, value);
            Response::Stored { key, value }
        }
        | Operation::Get { key } => match self.map.get(&key) {
            | Some(value) => Response::Found { key, value: *value },
            | None => Response::Missing { key },
        },
        | Operation::Delete { key } => match self.map.remove(&key) {
            | Some(_) => Response::Removed { key },
            | None => Response::Missing { key },
        },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_delete() {
        let mut store = Store::default();
        assert_eq!(store.execute(Operation::Get { key: 1000 }), Response::Missing { key: 1000 });
        assert_eq!(
            store.execute(Operation::Put { key: 1000, value: 3.86 }),
            Response::Stored { key: 1000, value: 3.86 },
        );
        assert_eq!(
            store.execute(Operation::Get { key: 1000 }),
            Response::Found { key: 1000, value: 3.86 },
        );
        assert_eq!(store.len(), 1);
        assert_eq!(store.execute(Operation::Delete { key: 1000 }), Response::Removed { key: 1000 });
        assert_eq!(store.execute(Operation::Delete { key: 1000 }), Response::Missing { key: 1000 });
        assert!(store.is_empty());
    }

    #[test]
    fn responses_read_like_the_shell() {
        assert_eq!(
            Response::Found { key: 1000, value: 3.86 }.to_string(),
            "Key: 1000 Value is: 3.86",
        );
    }
}
