//! Component identity and the addresses derived from it.

use std::fmt;
use std::sync::Arc;

use crate::error::IdentityError;
use crate::node::ManagedObject;

/// Attribute holding the component name on an exposed root.
pub const NAME_ATTRIBUTE: &str = "Name";

/// Attribute holding the component instance on an exposed root.
pub const INSTANCE_ATTRIBUTE: &str = "Instance";

/// Prefix of every naming-registry entry and object name.
pub const DOMAIN: &str = "rma";

/// Characters that may not appear in a name or instance.
const RESERVED: &[char] = &[':', '/', ',', '='];

/// Kinds of object bound for every registered component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// The exposed root object
    Application,
    Agent,
    ComponentInfo,
    Settings,
    ServiceInfo,
    ConnectionInfo,
    Notifications,
}

impl ObjectKind {
    /// Every kind, in binding order.
    pub const ALL: [ObjectKind; 7] = [
        Self::Application,
        Self::Agent,
        Self::ComponentInfo,
        Self::Settings,
        Self::ServiceInfo,
        Self::ConnectionInfo,
        Self::Notifications,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Application => "Application",
            Self::Agent => "Agent",
            Self::ComponentInfo => "ComponentInfo",
            Self::Settings => "Settings",
            Self::ServiceInfo => "ServiceInfo",
            Self::ConnectionInfo => "ConnectionInfo",
            Self::Notifications => "Notifications",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one exposed component: `(name, instance, shared key)`.
///
/// Immutable once a session has been created for it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ComponentIdentity {
    name: String,
    instance: String,
    shared_key: Option<String>,
}

impl ComponentIdentity {
    pub fn new(
        name: impl Into<String>,
        instance: impl Into<String>,
        shared_key: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            instance: instance.into(),
            shared_key,
        }
    }

    /// Reads `Name` and `Instance` from an exposed root object.
    ///
    /// Fails when either attribute is missing or not text.
    pub fn from_root(
        root: &Arc<dyn ManagedObject>,
        shared_key: Option<String>,
    ) -> Result<Self, IdentityError> {
        let text = |attribute: &str| {
            root.get(attribute)
                .and_then(|node| node.as_leaf().and_then(|v| v.as_text().map(str::to_string)))
                .ok_or_else(|| IdentityError::MissingAttribute {
                    attribute: attribute.to_string(),
                })
        };

        Ok(Self::new(
            text(NAME_ATTRIBUTE)?,
            text(INSTANCE_ATTRIBUTE)?,
            shared_key,
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn shared_key(&self) -> Option<&str> {
        self.shared_key.as_deref()
    }

    /// Checks that name and instance follow the naming standard.
    pub fn validate(&self) -> Result<(), IdentityError> {
        for (field, value) in [("name", &self.name), ("instance", &self.instance)] {
            let malformed = value.is_empty()
                || value
                    .chars()
                    .any(|c| c.is_whitespace() || RESERVED.contains(&c));
            if malformed {
                return Err(IdentityError::Malformed {
                    field: field.to_string(),
                    value: value.clone(),
                });
            }
        }
        Ok(())
    }

    /// Registry key: `name:instance:sharedKey` (empty key when not shared).
    pub fn key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.name,
            self.instance,
            self.shared_key.as_deref().unwrap_or_default()
        )
    }

    /// Naming-registry entry: `rma/<name>_<instance>`.
    pub fn naming_name(&self) -> String {
        format!("{DOMAIN}/{}_{}", self.name, self.instance)
    }

    /// Object-table name for one of the component's bound objects.
    pub fn object_name(&self, kind: ObjectKind) -> String {
        format!(
            "{DOMAIN}:type={kind},name={},instance={}",
            self.name, self.instance
        )
    }
}

impl fmt::Display for ComponentIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ManagedRecord;

    #[test]
    fn test_from_root_reads_name_and_instance() {
        let root: Arc<dyn ManagedObject> = Arc::new(
            ManagedRecord::new("App")
                .with_scalar("Name", "ABC")
                .with_scalar("Instance", "Backup"),
        );
        let id = ComponentIdentity::from_root(&root, None).unwrap();
        assert_eq!(id.name(), "ABC");
        assert_eq!(id.instance(), "Backup");
        assert_eq!(id.shared_key(), None);
    }

    #[test]
    fn test_from_root_requires_text_attributes() {
        let root: Arc<dyn ManagedObject> = Arc::new(
            ManagedRecord::new("App")
                .with_scalar("Name", "ABC")
                .with_scalar("Instance", 3),
        );
        let err = ComponentIdentity::from_root(&root, None).unwrap_err();
        assert_eq!(
            err,
            IdentityError::MissingAttribute {
                attribute: "Instance".to_string()
            }
        );
    }

    #[test]
    fn test_derived_addresses() {
        let id = ComponentIdentity::new("ABC", "Backup", Some("k1".to_string()));
        assert_eq!(id.key(), "ABC:Backup:k1");
        assert_eq!(id.naming_name(), "rma/ABC_Backup");
        assert_eq!(
            id.object_name(ObjectKind::Settings),
            "rma:type=Settings,name=ABC,instance=Backup"
        );

        let unshared = ComponentIdentity::new("ABC", "Backup", None);
        assert_eq!(unshared.key(), "ABC:Backup:");
        assert_ne!(unshared, id);
    }

    #[test]
    fn test_validate_rejects_reserved_characters() {
        assert!(ComponentIdentity::new("ABC", "Backup", None).validate().is_ok());

        for bad in ["", "a:b", "a/b", "a,b", "a=b", "a b"] {
            let err = ComponentIdentity::new(bad, "Backup", None)
                .validate()
                .unwrap_err();
            assert!(matches!(err, IdentityError::Malformed { .. }), "{bad:?}");
        }

        let err = ComponentIdentity::new("ABC", "", None).validate().unwrap_err();
        assert_eq!(
            err,
            IdentityError::Malformed {
                field: "instance".to_string(),
                value: String::new()
            }
        );
    }
}
