//! Run accounting: per-entity counters, relation counters, and the literal
//! warning list, emitted once at the end of a run even when a phase failed.

use chrono::{DateTime, Local};
use log::{debug, info, warn};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EntityCounters {
    pub fetched: u64,
    pub inserted: u64,
    pub updated: u64,
    pub skipped: u64,
    pub errors: u64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelationCounters {
    pub craftsman_trades: u64,
    pub work_order_craftsmen: u64,
}

#[derive(Debug, Default, Clone)]
pub struct Report {
    pub craftsmen: EntityCounters,
    pub work_orders: EntityCounters,
    pub relations: RelationCounters,
    pub warnings: Vec<String>,
    pub started_at: Option<DateTime<Local>>,
    pub finished_at: Option<DateTime<Local>>,
}

impl Report {
    pub fn start(&mut self) {
        self.started_at = Some(Local::now());
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Local::now());
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        debug!("{message}");
        self.warnings.push(message);
    }

    pub fn duration_secs(&self) -> Option<f64> {
        let (started, finished) = (self.started_at?, self.finished_at?);
        Some((finished - started).num_milliseconds() as f64 / 1000.0)
    }

    pub fn emit(&self) {
        info!("=== sync summary ===");
        match self.duration_secs() {
            Some(seconds) => info!("duration: {seconds:.1}s"),
            None => info!("duration: n/a"),
        }
        info!(
            "craftsmen - fetched: {}, inserted: {}, updated: {}, skipped: {}, errors: {}",
            self.craftsmen.fetched,
            self.craftsmen.inserted,
            self.craftsmen.updated,
            self.craftsmen.skipped,
            self.craftsmen.errors
        );
        info!(
            "work orders - fetched: {}, inserted: {}, updated: {}, skipped: {}, errors: {}",
            self.work_orders.fetched,
            self.work_orders.inserted,
            self.work_orders.updated,
            self.work_orders.skipped,
            self.work_orders.errors
        );
        info!(
            "relations created - craftsman/trade: {}, work order/craftsman: {}",
            self.relations.craftsman_trades, self.relations.work_order_craftsmen
        );
        if !self.warnings.is_empty() {
            warn!("{} warning(s) during the run:", self.warnings.len());
            for warning in &self.warnings {
                warn!("  - {warning}");
            }
        }
    }
}
