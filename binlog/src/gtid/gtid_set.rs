use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

use serde::Serialize;

use common::err::{CResult, Error};

use crate::gtid::uuid_set::parse_uuid;
use crate::gtid::UuidSet;

/// Ordered set of (source UUID, transaction intervals), the applied-position
/// model of the whole pipeline.
///
/// The empty set is a real value ("replicate from the very beginning") and
/// renders as the empty string, distinct from "no GTID recorded".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GtidSet {
    uuid_sets: BTreeMap<String, UuidSet>,
}

impl Display for GtidSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.uuid_sets.values().map(|set| set.to_string()).collect();
        write!(f, "{}", rendered.join(","))
    }
}

impl GtidSet {
    pub fn new() -> Self {
        GtidSet {
            uuid_sets: BTreeMap::new(),
        }
    }

    /// Parses the canonical form `uuid:lo-hi[:lo-hi]...[,uuid:...]`.
    /// Whitespace around commas is tolerated; an empty string is the empty
    /// set.
    pub fn parse(text: &str) -> CResult<GtidSet> {
        let text = text.replace('\n', "");
        if text.trim().is_empty() {
            return Ok(GtidSet::new());
        }

        let mut uuid_sets = BTreeMap::new();
        for part in text.split(',') {
            let set = UuidSet::parse(part.trim())?;
            match uuid_sets.remove(set.source_id()) {
                None => {
                    uuid_sets.insert(set.source_id().to_string(), set);
                }
                Some(mut existing) => {
                    for interval in set.intervals() {
                        existing.push_interval(*interval);
                    }
                    uuid_sets.insert(existing.source_id().to_string(), existing);
                }
            }
        }
        Ok(GtidSet { uuid_sets })
    }

    /// Records one applied transaction `uuid:gno`.
    pub fn add_gtid(&mut self, gtid: &str) -> CResult<()> {
        let (uuid_part, gno_part) = gtid
            .split_once(':')
            .ok_or_else(|| Error::InvalidInput(format!("invalid GTID: {}", gtid)))?;
        let source_id = parse_uuid(uuid_part)?;
        let gno: u64 = gno_part
            .parse()
            .map_err(|_| Error::InvalidInput(format!("invalid GTID transaction number: {}", gtid)))?;

        match self.uuid_sets.get_mut(&source_id) {
            Some(set) => set.add_gno(gno)?,
            None => {
                let mut set = UuidSet::new(source_id.clone(), Vec::new());
                set.add_gno(gno)?;
                self.uuid_sets.insert(source_id, set);
            }
        }
        Ok(())
    }

    pub fn contains(&self, gtid: &str) -> bool {
        let Some((uuid_part, gno_part)) = gtid.split_once(':') else {
            return false;
        };
        let Ok(source_id) = parse_uuid(uuid_part) else {
            return false;
        };
        let Ok(gno) = gno_part.parse::<u64>() else {
            return false;
        };
        self.uuid_sets.get(&source_id).map(|set| set.contains(gno)).unwrap_or(false)
    }

    pub fn uuid_sets(&self) -> &BTreeMap<String, UuidSet> {
        &self.uuid_sets
    }

    pub fn is_empty(&self) -> bool {
        self.uuid_sets.is_empty()
    }
}
