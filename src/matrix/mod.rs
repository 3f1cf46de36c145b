//! Impact matrix construction
//!
//! One row per user, one boolean per evaluated policy. Membership lookups run
//! concurrently up to the configured parallelism; rows come back in the order
//! the users were given.

pub mod evaluate;
pub mod selection;

use crate::error::{MatrixError, Result};
use crate::graph::conditional_access::ConditionalAccessPolicy;
use crate::graph::directory::{self, Memberships, User};
use crate::graph::GraphClient;
use futures::stream::{self, StreamExt};
use indicatif::ProgressBar;
use std::collections::HashSet;

/// Columns every row starts with, before the policy columns
pub const FIXED_COLUMNS: [&str; 5] = ["user", "upn", "job", "external", "enabled"];

#[derive(Debug, Clone, PartialEq)]
pub struct MatrixRow {
    pub user: String,
    pub upn: String,
    pub job: String,
    pub external: bool,
    pub enabled: bool,
    /// One entry per policy column, same order as `ImpactMatrix::columns`
    pub in_scope: Vec<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserFailure {
    pub upn: String,
    pub error: String,
}

#[derive(Debug, Clone, Default)]
pub struct ImpactMatrix {
    pub columns: Vec<String>,
    pub rows: Vec<MatrixRow>,
    pub failures: Vec<UserFailure>,
}

impl ImpactMatrix {
    /// Number of users each policy column applies to
    pub fn coverage(&self) -> Vec<(&str, usize)> {
        self.columns
            .iter()
            .enumerate()
            .map(|(i, column)| {
                let count = self.rows.iter().filter(|r| r.in_scope[i]).count();
                (column.as_str(), count)
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MatrixOptions {
    pub parallel: usize,
    pub transitive: bool,
}

impl Default for MatrixOptions {
    fn default() -> Self {
        Self {
            parallel: 1,
            transitive: false,
        }
    }
}

fn strip(value: &str, chars: &[char]) -> String {
    value.chars().filter(|c| !chars.contains(c)).collect()
}

/// Column names for the policies; repeated display names get an ID suffix
pub fn policy_columns(policies: &[ConditionalAccessPolicy]) -> Vec<String> {
    let mut taken: HashSet<String> = FIXED_COLUMNS.iter().map(|c| c.to_string()).collect();

    policies
        .iter()
        .map(|policy| {
            let mut column = policy.display_name.clone();
            if taken.contains(&column) {
                let short_id: String = policy.id.chars().take(8).collect();
                column = format!("{} ({})", policy.display_name, short_id);
                if taken.contains(&column) {
                    column = format!("{} ({})", policy.display_name, policy.id);
                }
            }
            taken.insert(column.clone());
            column
        })
        .collect()
}

/// Evaluate every policy for one user
pub fn build_row(
    user: &User,
    policies: &[ConditionalAccessPolicy],
    memberships: &Memberships,
) -> MatrixRow {
    MatrixRow {
        user: strip(user.display_name.as_deref().unwrap_or(""), &[',', ';']),
        upn: strip(user.upn(), &[',']),
        job: strip(user.job_title.as_deref().unwrap_or(""), &[',', ';']),
        external: user.is_external(),
        enabled: user.account_enabled.unwrap_or(false),
        in_scope: policies
            .iter()
            .map(|p| evaluate::is_in_scope(p, user, memberships))
            .collect(),
    }
}

/// Build the matrix, fetching each user's memberships from Graph
pub async fn build_matrix(
    client: &GraphClient,
    policies: &[ConditionalAccessPolicy],
    users: &[User],
    options: MatrixOptions,
    progress: &ProgressBar,
) -> Result<ImpactMatrix> {
    let parallel = options.parallel.max(1);
    tracing::debug!(
        "Evaluating {} user(s) against {} policies, {} at a time",
        users.len(),
        policies.len(),
        parallel
    );

    let mut outcomes: Vec<(usize, Result<MatrixRow>)> = stream::iter(users.iter().enumerate())
        .map(|(index, user)| async move {
            let outcome = directory::member_of(client, &user.id, options.transitive)
                .await
                .map(|memberships| build_row(user, policies, &memberships));
            (index, outcome)
        })
        .buffer_unordered(parallel)
        .inspect(|_| progress.inc(1))
        .collect()
        .await;

    outcomes.sort_by_key(|(index, _)| *index);

    let mut matrix = ImpactMatrix {
        columns: policy_columns(policies),
        ..Default::default()
    };

    for (index, outcome) in outcomes {
        match outcome {
            Ok(row) => matrix.rows.push(row),
            Err(e) => {
                let upn = users[index].upn().to_string();
                tracing::warn!("Skipping {}: {}", upn, e);
                matrix.failures.push(UserFailure {
                    upn,
                    error: e.to_string(),
                });
            }
        }
    }

    if matrix.rows.is_empty() && !matrix.failures.is_empty() {
        return Err(MatrixError::GraphApiError(format!(
            "Membership lookup failed for all {} user(s); first error: {}",
            matrix.failures.len(),
            matrix.failures[0].error
        )));
    }

    Ok(matrix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::conditional_access::{PolicyConditions, PolicyState, UserCondition};

    fn policy(id: &str, name: &str) -> ConditionalAccessPolicy {
        ConditionalAccessPolicy {
            id: id.into(),
            display_name: name.into(),
            state: PolicyState::Enabled,
            conditions: Some(PolicyConditions {
                users: Some(UserCondition {
                    include_users: Some(vec!["All".into()]),
                    ..Default::default()
                }),
            }),
        }
    }

    #[test]
    fn test_policy_columns_disambiguate_duplicates() {
        let policies = vec![
            policy("aaaaaaaa-1111", "Require MFA"),
            policy("bbbbbbbb-2222", "Require MFA"),
            policy("cccccccc-3333", "user"),
        ];
        assert_eq!(
            policy_columns(&policies),
            vec!["Require MFA", "Require MFA (bbbbbbbb)", "user (cccccccc)"]
        );
    }

    #[test]
    fn test_build_row_strips_separators() {
        let user = User {
            id: "u1".into(),
            user_principal_name: Some("jane,doe@contoso.com".into()),
            display_name: Some("Doe, Jane; Jr".into()),
            job_title: Some("Sales; EMEA, North".into()),
            account_enabled: Some(true),
            user_type: Some("Member".into()),
        };
        let row = build_row(&user, &[policy("p", "All")], &Memberships::default());

        assert_eq!(row.user, "Doe Jane Jr");
        assert_eq!(row.upn, "janedoe@contoso.com");
        assert_eq!(row.job, "Sales EMEA North");
        assert!(!row.external);
        assert!(row.enabled);
        assert_eq!(row.in_scope, vec![true]);
    }

    #[test]
    fn test_build_row_defaults_for_missing_fields() {
        let user = User {
            id: "u2".into(),
            ..Default::default()
        };
        let row = build_row(&user, &[], &Memberships::default());
        assert_eq!(row.user, "");
        assert_eq!(row.job, "");
        assert!(!row.enabled);
        assert!(row.in_scope.is_empty());
    }

    #[test]
    fn test_coverage_counts() {
        let matrix = ImpactMatrix {
            columns: vec!["A".into(), "B".into()],
            rows: vec![
                MatrixRow {
                    user: "x".into(),
                    upn: "x".into(),
                    job: String::new(),
                    external: false,
                    enabled: true,
                    in_scope: vec![true, false],
                },
                MatrixRow {
                    user: "y".into(),
                    upn: "y".into(),
                    job: String::new(),
                    external: false,
                    enabled: true,
                    in_scope: vec![true, true],
                },
            ],
            failures: Vec::new(),
        };
        assert_eq!(matrix.coverage(), vec![("A", 2), ("B", 1)]);
    }
}
