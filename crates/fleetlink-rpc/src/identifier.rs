use std::fmt;

/// Which process of a connection implements a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// The host process.
    Main,
    /// The worker process.
    Remote,
}

impl Side {
    /// Wire id prefix for services implemented on this side.
    pub fn prefix(self) -> char {
        match self {
            Side::Main => 'm',
            Side::Remote => 'e',
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Main => f.write_str("main"),
            Side::Remote => f.write_str("remote"),
        }
    }
}

/// Stable, side-tagged name of a remotely callable service.
///
/// The wire id carries the side prefix, so a main-side and a remote-side
/// service with the same name never collide on one connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceIdentifier {
    side: Side,
    id: String,
    methods: &'static [&'static str],
}

impl ServiceIdentifier {
    /// A service implemented by the host.
    pub fn main(name: &str, methods: &'static [&'static str]) -> Self {
        Self::new(Side::Main, name, methods)
    }

    /// A service implemented by the worker.
    pub fn remote(name: &str, methods: &'static [&'static str]) -> Self {
        Self::new(Side::Remote, name, methods)
    }

    fn new(side: Side, name: &str, methods: &'static [&'static str]) -> Self {
        Self {
            side,
            id: format!("{}{name}", side.prefix()),
            methods,
        }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    /// Wire id, including the side prefix.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Declared method names, in declaration order.
    pub fn method_names(&self) -> &'static [&'static str] {
        self.methods
    }

    pub fn has_method(&self, method: &str) -> bool {
        self.methods.contains(&method)
    }
}

impl fmt::Display for ServiceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}
