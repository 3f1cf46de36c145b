//! Users, groups and memberships from the Entra ID directory

use crate::error::{MatrixError, Result};
use crate::graph::GraphClient;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

const USER_FIELDS: &str = "id,userPrincipalName,displayName,jobTitle,accountEnabled,userType";

const DIRECTORY_ROLE_TYPE: &str = "#microsoft.graph.directoryRole";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub user_principal_name: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub job_title: Option<String>,
    #[serde(default)]
    pub account_enabled: Option<bool>,
    #[serde(default)]
    pub user_type: Option<String>,
}

impl User {
    pub fn upn(&self) -> &str {
        self.user_principal_name.as_deref().unwrap_or("")
    }

    /// B2B accounts carry `#EXT#` in their UPN
    pub fn is_external(&self) -> bool {
        self.upn().contains("#EXT#")
    }

    pub fn is_guest(&self) -> bool {
        self.user_type
            .as_deref()
            .is_some_and(|t| t.eq_ignore_ascii_case("guest"))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// An entry of a user's memberOf collection (group, directory role, admin unit)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryObject {
    pub id: String,
    #[serde(rename = "@odata.type", default)]
    pub odata_type: Option<String>,
    #[serde(default)]
    pub role_template_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IdOnly {
    id: String,
}

/// Group object IDs and directory role template IDs a user holds
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Memberships {
    pub group_ids: HashSet<String>,
    pub role_template_ids: HashSet<String>,
}

impl Memberships {
    pub fn from_objects(objects: Vec<DirectoryObject>) -> Self {
        let mut memberships = Self::default();

        for object in objects {
            let is_role = object.odata_type.as_deref() == Some(DIRECTORY_ROLE_TYPE);
            match (is_role, object.role_template_id) {
                (true, Some(template)) => {
                    memberships.role_template_ids.insert(template);
                }
                _ => {
                    memberships.group_ids.insert(object.id);
                }
            }
        }

        memberships
    }
}

/// List every user with the fields the matrix reports on
pub async fn list_users(client: &GraphClient) -> Result<Vec<User>> {
    client
        .get_all_pages(&format!("users?$select={}&$top=999", USER_FIELDS))
        .await
}

/// Whether the argument already is an object ID
pub fn is_object_id(value: &str) -> bool {
    uuid::Uuid::parse_str(value).is_ok()
}

/// Escape a value for use inside an OData string literal
fn odata_quote(value: &str) -> String {
    value.replace('\'', "''")
}

/// Turn a group object ID or display name into an object ID
pub async fn resolve_group(client: &GraphClient, group: &str) -> Result<String> {
    if is_object_id(group) {
        return Ok(group.to_string());
    }

    let filter = format!("displayName eq '{}'", odata_quote(group));
    let url = reqwest::Url::parse_with_params(
        &client.url_for("groups"),
        &[("$filter", filter.as_str()), ("$select", "id,displayName")],
    )
    .map_err(|e| MatrixError::InvalidArgument(format!("Bad group name '{}': {}", group, e)))?;
    let matches: Vec<Group> = client.get_all_pages(url.as_str()).await?;

    match matches.len() {
        0 => Err(MatrixError::GroupNotFound(group.to_string())),
        1 => {
            tracing::debug!("Resolved group '{}' to {}", group, matches[0].id);
            Ok(matches[0].id.clone())
        }
        count => Err(MatrixError::AmbiguousGroup {
            name: group.to_string(),
            count,
        }),
    }
}

/// Object IDs of a group's direct members
pub async fn group_member_ids(client: &GraphClient, group_id: &str) -> Result<Vec<String>> {
    let members: Vec<IdOnly> = client
        .get_all_pages(&format!("groups/{}/members?$select=id", group_id))
        .await?;

    Ok(members.into_iter().map(|m| m.id).collect())
}

/// Groups and roles a user belongs to, directly or transitively
pub async fn member_of(client: &GraphClient, user_id: &str, transitive: bool) -> Result<Memberships> {
    let relation = if transitive {
        "transitiveMemberOf"
    } else {
        "memberOf"
    };

    let objects: Vec<DirectoryObject> = client
        .get_all_pages(&format!("users/{}/{}", user_id, relation))
        .await?;

    Ok(Memberships::from_objects(objects))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_and_guest_detection() {
        let user = User {
            id: "u".into(),
            user_principal_name: Some("bob_fabrikam.com#EXT#@contoso.onmicrosoft.com".into()),
            user_type: Some("Member".into()),
            ..Default::default()
        };
        assert!(user.is_external());
        assert!(!user.is_guest());

        let guest = User {
            id: "g".into(),
            user_type: Some("Guest".into()),
            ..Default::default()
        };
        assert!(guest.is_guest());
        assert!(!guest.is_external());
        assert_eq!(guest.upn(), "");
    }

    #[test]
    fn test_memberships_split_roles_from_groups() {
        let objects: Vec<DirectoryObject> = serde_json::from_value(serde_json::json!([
            {"@odata.type": "#microsoft.graph.group", "id": "g1"},
            {"@odata.type": "#microsoft.graph.directoryRole", "id": "r-inst", "roleTemplateId": "62e90394-69f5-4237-9190-012177145e10"},
            {"@odata.type": "#microsoft.graph.administrativeUnit", "id": "au1"},
            {"id": "g2"}
        ]))
        .unwrap();

        let memberships = Memberships::from_objects(objects);
        assert!(memberships.group_ids.contains("g1"));
        assert!(memberships.group_ids.contains("g2"));
        assert!(memberships.group_ids.contains("au1"));
        assert!(!memberships.group_ids.contains("r-inst"));
        assert!(memberships
            .role_template_ids
            .contains("62e90394-69f5-4237-9190-012177145e10"));
    }

    #[test]
    fn test_object_id_detection() {
        assert!(is_object_id("3c54f805-db0a-4f83-be24-6744ab9fd758"));
        assert!(!is_object_id("Finance Team"));
        assert_eq!(odata_quote("O'Brien's"), "O''Brien''s");
    }
}
