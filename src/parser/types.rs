//! Go types as seen by the checker.
//!
//! Only the structure needed to compare request/response/parameter types
//! between a server and a client is modeled. Named types are identified by
//! the package name they were declared in, so `Foo` inside package `api`
//! and `api.Foo` in an importing package are the same type.

use serde::{Serialize, Serializer};
use std::fmt;
use tree_sitter::Node;

use super::named_children;
use super::program::SourceFile;

/// Predeclared Go type names.
const BUILTINS: &[&str] = &[
    "bool", "string", "int", "int8", "int16", "int32", "int64", "uint", "uint8", "uint16",
    "uint32", "uint64", "uintptr", "float32", "float64", "complex64", "complex128", "error",
    "byte", "rune", "any",
];

/// A resolved (or unresolvable) Go type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GoType {
    /// A predeclared (`package == None`) or declared type.
    Named {
        package: Option<String>,
        name: String,
    },
    Pointer(Box<GoType>),
    Slice(Box<GoType>),
    Array(String, Box<GoType>),
    Map(Box<GoType>, Box<GoType>),
    Chan(Box<GoType>),
    Func,
    Interface,
    Struct,
    /// The type of the `nil` literal; also the "no request/response" sentinel.
    UntypedNil,
    /// Anything the facade could not type.
    Unknown,
}

impl GoType {
    /// A predeclared type such as `string`.
    pub fn builtin(name: &str) -> Self {
        match name {
            "byte" => GoType::builtin("uint8"),
            "rune" => GoType::builtin("int32"),
            "any" => GoType::Interface,
            _ => GoType::Named {
                package: None,
                name: name.to_string(),
            },
        }
    }

    /// A type declared in `package`.
    pub fn named(package: &str, name: &str) -> Self {
        GoType::Named {
            package: Some(package.to_string()),
            name: name.to_string(),
        }
    }

    pub fn pointer_to(elem: GoType) -> Self {
        GoType::Pointer(Box::new(elem))
    }

    pub fn string() -> Self {
        GoType::builtin("string")
    }

    pub fn is_builtin_name(name: &str) -> bool {
        BUILTINS.contains(&name)
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, GoType::Pointer(_))
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, GoType::Unknown)
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, GoType::UntypedNil)
    }

    pub fn is_string(&self) -> bool {
        matches!(self, GoType::Named { package: None, name } if name == "string")
    }

    /// Pointee of a pointer type; other types are returned unchanged.
    pub fn elem(&self) -> GoType {
        match self {
            GoType::Pointer(inner) => (**inner).clone(),
            other => other.clone(),
        }
    }

    /// Pointer to this type, except that nil stays nil.
    pub fn ptr_or_nil(&self) -> GoType {
        match self {
            GoType::UntypedNil => GoType::UntypedNil,
            other => GoType::pointer_to(other.clone()),
        }
    }

    /// Whether this is the named type `package.name`, behind any number of
    /// pointers.
    pub fn is_named_through_ptr(&self, package: &str, name: &str) -> bool {
        match self {
            GoType::Pointer(inner) => inner.is_named_through_ptr(package, name),
            GoType::Named {
                package: Some(p),
                name: n,
            } => p == package && n == name,
            _ => false,
        }
    }

    /// Type identity. `Unknown` is never identical to anything.
    pub fn identical(&self, other: &GoType) -> bool {
        !self.contains_unknown() && self == other
    }

    pub fn contains_unknown(&self) -> bool {
        match self {
            GoType::Unknown => true,
            GoType::Pointer(t) | GoType::Slice(t) | GoType::Array(_, t) | GoType::Chan(t) => {
                t.contains_unknown()
            }
            GoType::Map(k, v) => k.contains_unknown() || v.contains_unknown(),
            _ => false,
        }
    }

    /// Parse a type node as written in `file`.
    pub fn from_node(node: Node<'_>, file: &SourceFile) -> GoType {
        match node.kind() {
            "type_identifier" | "identifier" => {
                let name = file.text(node);
                if Self::is_builtin_name(name) {
                    GoType::builtin(name)
                } else {
                    GoType::named(&file.package, name)
                }
            }
            "qualified_type" => {
                let (Some(pkg), Some(name)) = (
                    node.child_by_field_name("package"),
                    node.child_by_field_name("name"),
                ) else {
                    return GoType::Unknown;
                };
                let local = file.text(pkg);
                let package = file.import(local).unwrap_or(local);
                GoType::named(package, file.text(name))
            }
            "pointer_type" => match named_children(node).into_iter().next() {
                Some(inner) => GoType::pointer_to(GoType::from_node(inner, file)),
                None => GoType::Unknown,
            },
            "slice_type" => match node.child_by_field_name("element") {
                Some(elem) => GoType::Slice(Box::new(GoType::from_node(elem, file))),
                None => GoType::Unknown,
            },
            "array_type" => match (
                node.child_by_field_name("length"),
                node.child_by_field_name("element"),
            ) {
                (Some(len), Some(elem)) => GoType::Array(
                    file.text(len).to_string(),
                    Box::new(GoType::from_node(elem, file)),
                ),
                _ => GoType::Unknown,
            },
            "map_type" => match (
                node.child_by_field_name("key"),
                node.child_by_field_name("value"),
            ) {
                (Some(key), Some(value)) => GoType::Map(
                    Box::new(GoType::from_node(key, file)),
                    Box::new(GoType::from_node(value, file)),
                ),
                _ => GoType::Unknown,
            },
            "channel_type" => match node.child_by_field_name("value") {
                Some(value) => GoType::Chan(Box::new(GoType::from_node(value, file))),
                None => GoType::Unknown,
            },
            "generic_type" => match node.child_by_field_name("type") {
                Some(inner) => GoType::from_node(inner, file),
                None => GoType::Unknown,
            },
            "parenthesized_type" => match named_children(node).into_iter().next() {
                Some(inner) => GoType::from_node(inner, file),
                None => GoType::Unknown,
            },
            "function_type" => GoType::Func,
            "interface_type" => GoType::Interface,
            "struct_type" => GoType::Struct,
            _ => GoType::Unknown,
        }
    }
}

impl fmt::Display for GoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GoType::Named {
                package: Some(package),
                name,
            } => write!(f, "{}.{}", package, name),
            GoType::Named {
                package: None,
                name,
            } => write!(f, "{}", name),
            GoType::Pointer(inner) => write!(f, "*{}", inner),
            GoType::Slice(inner) => write!(f, "[]{}", inner),
            GoType::Array(len, inner) => write!(f, "[{}]{}", len, inner),
            GoType::Map(key, value) => write!(f, "map[{}]{}", key, value),
            GoType::Chan(inner) => write!(f, "chan {}", inner),
            GoType::Func => write!(f, "func"),
            GoType::Interface => write!(f, "interface{{}}"),
            GoType::Struct => write!(f, "struct{{...}}"),
            GoType::UntypedNil => write!(f, "untyped nil"),
            GoType::Unknown => write!(f, "invalid type"),
        }
    }
}

impl Serialize for GoType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
