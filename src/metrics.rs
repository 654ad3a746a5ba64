use std::collections::BTreeMap;

use serde::Serialize;

use crate::repository::{PUBKEY_PREFIX, RepositoryCache, TYPE_PREFIX};
use crate::status::{LoadingState, StatusController};

/// Point-in-time gauges. Repository counts are absent when the backend
/// listing is unavailable, which is not the same as zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Gauges {
    pub load_counter: Option<i64>,
    pub type_repositories: Option<usize>,
    pub pubkey_repositories: Option<usize>,
    pub total_repositories: Option<usize>,
    pub states: BTreeMap<&'static str, u8>,
}

pub fn collect(status: &StatusController, cache: &RepositoryCache) -> Gauges {
    let current = status.get_state();
    let states = LoadingState::ALL
        .into_iter()
        .map(|state| {
            let active = current.is_some_and(|status| status.state == state);
            (state.as_str(), u8::from(active))
        })
        .collect();

    let names = cache.names();
    let with_prefix = |prefix: &str| {
        names
            .as_ref()
            .map(|names| names.iter().filter(|name| name.starts_with(prefix)).count())
    };

    Gauges {
        load_counter: current.map(|status| status.counter),
        type_repositories: with_prefix(TYPE_PREFIX),
        pubkey_repositories: with_prefix(PUBKEY_PREFIX),
        total_repositories: names.as_ref().map(|names| names.len()),
        states,
    }
}
