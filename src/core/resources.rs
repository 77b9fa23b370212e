//! Resource capacity vectors.
//!
//! A [`ResourceDescription`] is a sparse vector of capacity units (cores,
//! memory, accelerators) attached to a worker, a gap, or an implementation's
//! requirements. Placement works by *mutual subtraction*: walking a gap list
//! and carving requirement units out of each gap until nothing is missing.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of capacity tracked on a worker resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Processing cores.
    Cpu,
    /// Memory, in arbitrary units (typically MiB).
    Memory,
    /// Accelerator devices.
    Gpu,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Memory => write!(f, "memory"),
            Self::Gpu => write!(f, "gpu"),
        }
    }
}

/// Sparse capacity vector.
///
/// Zero-valued entries are never stored, so a depleted description is simply
/// an empty map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescription {
    units: BTreeMap<ResourceKind, u64>,
}

impl ResourceDescription {
    /// Empty (depleted) description.
    pub fn new() -> Self {
        Self::default()
    }

    /// Description with a single capacity entry.
    pub fn with(kind: ResourceKind, amount: u64) -> Self {
        let mut rd = Self::new();
        rd.set(kind, amount);
        rd
    }

    /// Sets the capacity for one kind, dropping the entry when zero.
    pub fn set(&mut self, kind: ResourceKind, amount: u64) {
        if amount == 0 {
            self.units.remove(&kind);
        } else {
            self.units.insert(kind, amount);
        }
    }

    /// Capacity for one kind (0 when absent).
    pub fn get(&self, kind: ResourceKind) -> u64 {
        self.units.get(&kind).copied().unwrap_or(0)
    }

    /// True when no capacity remains in any dimension.
    pub fn is_depleted(&self) -> bool {
        self.units.is_empty()
    }

    /// Mutual min-subtraction: for every kind, removes
    /// `min(self[kind], other[kind])` from both sides and returns the
    /// removed amounts. Used both to consume a gap's capacity against an
    /// implementation's outstanding requirements and vice versa.
    pub fn reduce_common(&mut self, other: &mut ResourceDescription) -> ResourceDescription {
        let mut reduction = ResourceDescription::new();
        let kinds: Vec<ResourceKind> = self
            .units
            .keys()
            .filter(|k| other.units.contains_key(k))
            .copied()
            .collect();
        for kind in kinds {
            let common = self.get(kind).min(other.get(kind));
            if common > 0 {
                self.set(kind, self.get(kind) - common);
                other.set(kind, other.get(kind) - common);
                reduction.set(kind, common);
            }
        }
        reduction
    }

    /// Per-kind saturating subtraction of `other` from `self`; `other` is
    /// left untouched.
    pub fn subtract_capped(&mut self, other: &ResourceDescription) {
        let kinds: Vec<ResourceKind> = self.units.keys().copied().collect();
        for kind in kinds {
            let remaining = self.get(kind).saturating_sub(other.get(kind));
            self.set(kind, remaining);
        }
    }

    /// Per-kind addition.
    pub fn add(&mut self, other: &ResourceDescription) {
        for (&kind, &amount) in &other.units {
            self.set(kind, self.get(kind).saturating_add(amount));
        }
    }

    /// True when every dimension of `requirements` fits inside `self`.
    pub fn can_host(&self, requirements: &ResourceDescription) -> bool {
        requirements
            .units
            .iter()
            .all(|(kind, amount)| self.get(*kind) >= *amount)
    }

    /// Iterates over the non-zero entries.
    pub fn entries(&self) -> impl Iterator<Item = (ResourceKind, u64)> + '_ {
        self.units.iter().map(|(&k, &v)| (k, v))
    }
}

impl fmt::Display for ResourceDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (kind, amount)) in self.units.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{kind}:{amount}")?;
        }
        write!(f, "}}")
    }
}

impl FromIterator<(ResourceKind, u64)> for ResourceDescription {
    fn from_iter<T: IntoIterator<Item = (ResourceKind, u64)>>(iter: T) -> Self {
        let mut rd = ResourceDescription::new();
        for (kind, amount) in iter {
            rd.set(kind, amount);
        }
        rd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reduce_common_partial() {
        let mut gap = ResourceDescription::with(ResourceKind::Cpu, 4);
        let mut req = ResourceDescription::with(ResourceKind::Cpu, 2);
        let reduction = gap.reduce_common(&mut req);
        assert_eq!(gap.get(ResourceKind::Cpu), 2);
        assert!(req.is_depleted());
        assert_eq!(reduction.get(ResourceKind::Cpu), 2);
    }

    #[test]
    fn test_reduce_common_exhausts_gap() {
        let mut gap = ResourceDescription::with(ResourceKind::Cpu, 2);
        let mut req = ResourceDescription::with(ResourceKind::Cpu, 4);
        gap.reduce_common(&mut req);
        assert!(gap.is_depleted());
        assert_eq!(req.get(ResourceKind::Cpu), 2);
    }

    #[test]
    fn test_reduce_common_disjoint_kinds() {
        let mut gap = ResourceDescription::with(ResourceKind::Cpu, 4);
        let mut req = ResourceDescription::with(ResourceKind::Gpu, 1);
        let reduction = gap.reduce_common(&mut req);
        assert!(reduction.is_depleted());
        assert_eq!(gap.get(ResourceKind::Cpu), 4);
        assert_eq!(req.get(ResourceKind::Gpu), 1);
    }

    #[test]
    fn test_can_host() {
        let capacity: ResourceDescription =
            [(ResourceKind::Cpu, 4), (ResourceKind::Memory, 1024)].into_iter().collect();
        assert!(capacity.can_host(&ResourceDescription::with(ResourceKind::Cpu, 4)));
        assert!(!capacity.can_host(&ResourceDescription::with(ResourceKind::Cpu, 5)));
        assert!(!capacity.can_host(&ResourceDescription::with(ResourceKind::Gpu, 1)));
    }

    #[test]
    fn test_subtract_capped() {
        let mut rd = ResourceDescription::with(ResourceKind::Cpu, 2);
        rd.subtract_capped(&ResourceDescription::with(ResourceKind::Cpu, 5));
        assert!(rd.is_depleted());
    }

    #[test]
    fn test_zero_entries_are_dropped() {
        let mut rd = ResourceDescription::new();
        rd.set(ResourceKind::Cpu, 0);
        assert!(rd.is_depleted());
        rd.set(ResourceKind::Cpu, 3);
        rd.set(ResourceKind::Cpu, 0);
        assert!(rd.is_depleted());
    }
}
