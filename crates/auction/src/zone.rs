//! Zones: named groups of cells, and compatibility filtering over them.
//!
//! Filtering narrows cells by rootfs, then volume drivers, then placement
//! tags. When nothing survives, the error names the furthest rung any cell
//! reached, so callers get the most specific reason available.

use std::collections::BTreeMap;

use crate::cell::Cell;
use crate::error::{AuctionError, AuctionResult};
use crate::types::PlacementConstraint;

/// Zones keyed by name. Iteration is in name order.
pub type Zones = BTreeMap<String, Zone>;

#[derive(Debug, Default)]
pub struct Zone {
    cells: Vec<Cell>,
}

impl Zone {
    pub fn new(cells: Vec<Cell>) -> Self {
        Self { cells }
    }

    pub fn push(&mut self, cell: Cell) {
        self.cells.push(cell);
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn cells_mut(&mut self) -> std::slice::IterMut<'_, Cell> {
        self.cells.iter_mut()
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Cell> {
        self.cells.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn sort_by_guid(&mut self) {
        self.cells.sort_by(|a, b| a.guid().cmp(b.guid()));
    }

    /// Instances of `process_guid` already known to this zone's cells,
    /// including ones reserved earlier in the current pass.
    pub fn instances_of(&self, process_guid: &str) -> usize {
        self.cells
            .iter()
            .flat_map(|cell| cell.state().lrps.iter())
            .filter(|lrp| lrp.process_guid == process_guid)
            .count()
    }

    /// Indices of the cells compatible with `constraint`.
    pub fn filter_cells(&self, constraint: &PlacementConstraint) -> AuctionResult<Vec<usize>> {
        let mut matching = Vec::with_capacity(self.cells.len());
        let mut err = Some(AuctionError::CellMismatch);

        for (index, cell) in self.cells.iter().enumerate() {
            if !cell.match_root_fs(&constraint.root_fs) {
                continue;
            }
            if err == Some(AuctionError::CellMismatch) {
                err = Some(AuctionError::VolumeDriverMismatch);
            }

            if !cell.match_volume_drivers(&constraint.volume_drivers) {
                continue;
            }
            if err == Some(AuctionError::VolumeDriverMismatch) {
                err = Some(AuctionError::placement_tag_mismatch(&constraint.placement_tags));
            }

            if cell.match_placement_tags(&constraint.placement_tags) {
                err = None;
                matching.push(index);
            }
        }

        match err {
            Some(err) => Err(err),
            None => Ok(matching),
        }
    }
}

/// Cells of one zone that passed filtering.
#[derive(Debug)]
pub struct FilteredZone<'a> {
    pub name: &'a str,
    pub zone: &'a Zone,
    pub cells: Vec<usize>,
    /// Existing instances of the process being placed.
    pub instances: usize,
}

impl FilteredZone<'_> {
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Cell)> {
        self.cells
            .iter()
            .filter_map(|&index| self.zone.cells.get(index).map(|cell| (index, cell)))
    }
}

/// Keep the more specific of two compatibility failures. Ties go to the
/// newer error.
fn most_specific(current: Option<AuctionError>, next: AuctionError) -> AuctionError {
    match current {
        Some(current) if current.specificity() > next.specificity() => current,
        _ => next,
    }
}

/// Filter every zone by `constraint`. Zones with no compatible cell are
/// dropped; if all are dropped the most specific zone error is returned.
///
/// When `process_guid` is given, each surviving zone records how many
/// instances of that process it already holds.
pub fn filter_zones<'a>(
    zones: &'a Zones,
    constraint: &PlacementConstraint,
    process_guid: Option<&str>,
) -> AuctionResult<Vec<FilteredZone<'a>>> {
    let mut filtered = Vec::with_capacity(zones.len());
    let mut zone_error = None;

    for (name, zone) in zones {
        match zone.filter_cells(constraint) {
            Ok(cells) => filtered.push(FilteredZone {
                name: name.as_str(),
                zone,
                cells,
                instances: process_guid.map_or(0, |guid| zone.instances_of(guid)),
            }),
            Err(err) => zone_error = Some(most_specific(zone_error, err)),
        }
    }

    if filtered.is_empty() {
        return Err(zone_error.unwrap_or(AuctionError::CellMismatch));
    }
    Ok(filtered)
}

/// Emptiest zones first. Stable, so equal counts keep name order.
pub fn sort_zones_by_instances(zones: &mut [FilteredZone<'_>]) {
    zones.sort_by_key(|zone| zone.instances);
}
