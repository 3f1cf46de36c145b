//! Narrowing the directory's user list before evaluation
//!
//! Filters run in a fixed order: group membership, user type, random sample,
//! then the count limit.

use crate::error::{MatrixError, Result};
use crate::graph::directory::{self, User};
use crate::graph::GraphClient;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum UserType {
    Member,
    Guest,
}

impl UserType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserType::Member => "member",
            UserType::Guest => "guest",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SelectionOptions {
    pub groups: Vec<String>,
    pub user_type: Option<UserType>,
    pub sample: Option<f64>,
    pub number: Option<usize>,
    pub seed: Option<u64>,
}

/// Parse a sample fraction in `(0, 1]`
pub fn parse_fraction(value: &str) -> std::result::Result<f64, String> {
    let fraction: f64 = value
        .parse()
        .map_err(|_| format!("'{}' is not a number", value))?;
    check_fraction(fraction)
}

pub fn check_fraction(fraction: f64) -> std::result::Result<f64, String> {
    if fraction > 0.0 && fraction <= 1.0 {
        Ok(fraction)
    } else {
        Err(format!("sample must be greater than 0 and at most 1, got {}", fraction))
    }
}

/// Union of the direct members of every listed group
pub async fn collect_group_members(
    client: &GraphClient,
    groups: &[String],
) -> Result<HashSet<String>> {
    let mut members = HashSet::new();

    for group in groups {
        let group_id = directory::resolve_group(client, group).await?;
        let ids = directory::group_member_ids(client, &group_id).await?;
        tracing::debug!("Group {} has {} member(s)", group, ids.len());
        members.extend(ids);
    }

    Ok(members)
}

pub fn keep_members(users: Vec<User>, members: &HashSet<String>) -> Vec<User> {
    users.into_iter().filter(|u| members.contains(&u.id)).collect()
}

pub fn keep_type(users: Vec<User>, user_type: UserType) -> Vec<User> {
    users
        .into_iter()
        .filter(|u| {
            u.user_type
                .as_deref()
                .is_some_and(|t| t.to_lowercase() == user_type.as_str())
        })
        .collect()
}

/// Keep `floor(len * fraction)` users picked at random, in their original order
pub fn sample(users: Vec<User>, fraction: f64, rng: &mut StdRng) -> Vec<User> {
    let amount = ((users.len() as f64) * fraction).floor() as usize;
    let amount = amount.min(users.len());

    let picked: HashSet<usize> = rand::seq::index::sample(rng, users.len(), amount)
        .into_iter()
        .collect();

    users
        .into_iter()
        .enumerate()
        .filter(|(i, _)| picked.contains(i))
        .map(|(_, u)| u)
        .collect()
}

/// Apply the type, sample and count filters to an already group-filtered list
pub fn apply_local_filters(mut users: Vec<User>, options: &SelectionOptions) -> Vec<User> {
    if let Some(user_type) = options.user_type {
        users = keep_type(users, user_type);
    }

    if let Some(fraction) = options.sample {
        let mut rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        users = sample(users, fraction, &mut rng);
    }

    if let Some(number) = options.number {
        users.truncate(number);
    }

    users
}

/// Run every filter, fetching group members from Graph when groups are given
pub async fn select_users(
    client: &GraphClient,
    users: Vec<User>,
    options: &SelectionOptions,
) -> Result<Vec<User>> {
    if let Some(fraction) = options.sample {
        check_fraction(fraction).map_err(MatrixError::InvalidArgument)?;
    }

    let users = if options.groups.is_empty() {
        users
    } else {
        let members = collect_group_members(client, &options.groups).await?;
        keep_members(users, &members)
    };

    Ok(apply_local_filters(users, options))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users(n: usize) -> Vec<User> {
        (0..n)
            .map(|i| User {
                id: format!("u{}", i),
                user_type: Some(if i % 2 == 0 { "Member" } else { "Guest" }.into()),
                ..Default::default()
            })
            .collect()
    }

    fn ids(users: &[User]) -> Vec<&str> {
        users.iter().map(|u| u.id.as_str()).collect()
    }

    #[test]
    fn test_parse_fraction_bounds() {
        assert_eq!(parse_fraction("0.1"), Ok(0.1));
        assert_eq!(parse_fraction("1"), Ok(1.0));
        assert!(parse_fraction("0").is_err());
        assert!(parse_fraction("1.5").is_err());
        assert!(parse_fraction("ten").is_err());
    }

    #[test]
    fn test_keep_type_is_case_insensitive() {
        let guests = keep_type(users(5), UserType::Guest);
        assert_eq!(ids(&guests), vec!["u1", "u3"]);

        let mut no_type = users(1);
        no_type[0].user_type = None;
        assert!(keep_type(no_type, UserType::Member).is_empty());
    }

    #[test]
    fn test_keep_members() {
        let members: HashSet<String> = ["u2", "u4", "other"].iter().map(|s| s.to_string()).collect();
        assert_eq!(ids(&keep_members(users(5), &members)), vec!["u2", "u4"]);
    }

    #[test]
    fn test_sample_size_floors_and_preserves_order() {
        let mut rng = StdRng::seed_from_u64(7);
        let picked = sample(users(25), 0.1, &mut rng);
        assert_eq!(picked.len(), 2);

        let positions: Vec<usize> = picked
            .iter()
            .map(|u| u.id[1..].parse::<usize>().unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));

        let everyone = sample(users(6), 1.0, &mut rng);
        assert_eq!(ids(&everyone), vec!["u0", "u1", "u2", "u3", "u4", "u5"]);
    }

    #[test]
    fn test_sample_is_reproducible_with_seed() {
        let options = SelectionOptions {
            sample: Some(0.5),
            seed: Some(42),
            ..Default::default()
        };
        let a = apply_local_filters(users(20), &options);
        let b = apply_local_filters(users(20), &options);
        assert_eq!(ids(&a), ids(&b));
        assert_eq!(a.len(), 10);
    }

    #[test]
    fn test_filters_apply_in_order() {
        let options = SelectionOptions {
            user_type: Some(UserType::Member),
            sample: Some(1.0),
            number: Some(2),
            ..Default::default()
        };
        let selected = apply_local_filters(users(10), &options);
        assert_eq!(ids(&selected), vec!["u0", "u2"]);
    }

    #[test]
    fn test_number_larger_than_list() {
        let options = SelectionOptions {
            number: Some(100),
            ..Default::default()
        };
        assert_eq!(apply_local_filters(users(3), &options).len(), 3);
    }
}
