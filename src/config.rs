use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::Result;

/// Credential file layout: a single top-level `users` mapping.
#[derive(Debug, Deserialize)]
pub struct UsersFile {
    #[serde(default)]
    pub users: HashMap<String, String>,
}

/// Prefix file layout: `{"subnets": ["<cidr>", ...]}`.
#[derive(Debug, Deserialize)]
pub struct SubnetsFile {
    #[serde(default)]
    pub subnets: Vec<String>,
}

pub fn parse_users(input: &str) -> Result<HashMap<String, String>> {
    let parsed: UsersFile = serde_yaml::from_str(input)?;
    Ok(parsed.users)
}

pub fn load_users(path: &Path) -> Result<HashMap<String, String>> {
    parse_users(&fs::read_to_string(path)?)
}

pub fn parse_subnets(input: &str) -> Result<Vec<String>> {
    let parsed: SubnetsFile = serde_json::from_str(input)?;
    Ok(parsed.subnets)
}

pub fn load_subnets(path: &Path) -> Result<Vec<String>> {
    parse_subnets(&fs::read_to_string(path)?)
}
