//! Client capability advertisement.

use std::fmt;

/// A capability token understood by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientCapability {
    TestCapability,
    InsertOnlyTables,
}

impl ClientCapability {
    /// Wire value of the capability enum.
    #[must_use]
    pub fn wire_value(&self) -> i32 {
        match self {
            Self::TestCapability => 1,
            Self::InsertOnlyTables => 2,
        }
    }

    #[must_use]
    pub fn from_wire(value: i32) -> Option<Self> {
        match value {
            1 => Some(Self::TestCapability),
            2 => Some(Self::InsertOnlyTables),
            _ => None,
        }
    }
}

impl fmt::Display for ClientCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TestCapability => f.write_str("TEST_CAPABILITY"),
            Self::InsertOnlyTables => f.write_str("INSERT_ONLY_TABLES"),
        }
    }
}

/// Ordered capability list attached to read requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCapabilities {
    values: Vec<ClientCapability>,
}

impl ClientCapabilities {
    /// Set advertised by production clients.
    #[must_use]
    pub fn standard() -> Self {
        Self {
            values: vec![ClientCapability::InsertOnlyTables],
        }
    }

    /// Set advertised when the client runs inside a test environment.
    #[must_use]
    pub fn test() -> Self {
        Self {
            values: vec![
                ClientCapability::InsertOnlyTables,
                ClientCapability::TestCapability,
            ],
        }
    }

    /// Pick the variant once, at client construction.
    #[must_use]
    pub fn for_environment(in_test: bool) -> Self {
        if in_test {
            Self::test()
        } else {
            Self::standard()
        }
    }

    #[must_use]
    pub fn from_values(values: Vec<ClientCapability>) -> Self {
        Self { values }
    }

    #[must_use]
    pub fn values(&self) -> &[ClientCapability] {
        &self.values
    }

    #[must_use]
    pub fn contains(&self, capability: ClientCapability) -> bool {
        self.values.contains(&capability)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_selection() {
        let standard = ClientCapabilities::for_environment(false);
        assert_eq!(standard.values(), &[ClientCapability::InsertOnlyTables]);
        assert!(!standard.contains(ClientCapability::TestCapability));

        let test = ClientCapabilities::for_environment(true);
        assert_eq!(
            test.values(),
            &[ClientCapability::InsertOnlyTables, ClientCapability::TestCapability]
        );
    }

    #[test]
    fn test_wire_values() {
        assert_eq!(ClientCapability::TestCapability.wire_value(), 1);
        assert_eq!(ClientCapability::InsertOnlyTables.wire_value(), 2);
        assert_eq!(ClientCapability::from_wire(2), Some(ClientCapability::InsertOnlyTables));
        assert_eq!(ClientCapability::from_wire(9), None);
    }
}
