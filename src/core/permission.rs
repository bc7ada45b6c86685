use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, FromRepr};

/// Permission levels, totally ordered: a *lower* numeric value means *more*
/// privilege. Stored in the directory as the numeric repr, carried on the
/// wire as the lowercase name.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Display,
    EnumIter,
    EnumString,
    FromRepr,
)]
#[repr(u8)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PermissionLevel {
    Owner = 0,
    Admin = 1,
    User = 2,
}

impl PermissionLevel {
    /// Whether a user holding `self` may perform an operation gated at
    /// `required`. All privilege comparisons in the crate go through here.
    pub fn satisfies(self, required: PermissionLevel) -> bool {
        (self as u8) <= (required as u8)
    }

    /// The next-more-privileged level above `self`. Granting a level
    /// requires the grantor to hold at least `level.higher_permission()`,
    /// so an admin can create users but only an owner can create admins.
    /// Owner is the ceiling and maps to itself.
    pub fn higher_permission(self) -> PermissionLevel {
        let repr = (self as u8).saturating_sub(1);
        PermissionLevel::from_repr(repr).unwrap_or(PermissionLevel::Owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_satisfies_ordering() {
        assert!(PermissionLevel::Owner.satisfies(PermissionLevel::User));
        assert!(PermissionLevel::Owner.satisfies(PermissionLevel::Admin));
        assert!(PermissionLevel::Owner.satisfies(PermissionLevel::Owner));
        assert!(PermissionLevel::Admin.satisfies(PermissionLevel::User));
        assert!(!PermissionLevel::Admin.satisfies(PermissionLevel::Owner));
        assert!(!PermissionLevel::User.satisfies(PermissionLevel::Admin));
        assert!(PermissionLevel::User.satisfies(PermissionLevel::User));
    }

    #[test]
    fn test_higher_permission() {
        assert_eq!(
            PermissionLevel::User.higher_permission(),
            PermissionLevel::Admin
        );
        assert_eq!(
            PermissionLevel::Admin.higher_permission(),
            PermissionLevel::Owner
        );
        // Owner is already the ceiling
        assert_eq!(
            PermissionLevel::Owner.higher_permission(),
            PermissionLevel::Owner
        );
    }

    #[test]
    fn test_repr_round_trip() {
        for level in [
            PermissionLevel::Owner,
            PermissionLevel::Admin,
            PermissionLevel::User,
        ] {
            assert_eq!(PermissionLevel::from_repr(level as u8), Some(level));
        }
        assert_eq!(PermissionLevel::from_repr(3), None);
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(PermissionLevel::Admin.to_string(), "admin");
        assert_eq!(
            "owner".parse::<PermissionLevel>().unwrap(),
            PermissionLevel::Owner
        );
    }
}
