//! Per-exporter template state.
//!
//! A `TemplateStore` owns one `ExporterContext` per exporter identity. Each context
//! holds the templates that exporter has defined, the data sets that arrived before
//! their template did, and the sequence/activity bookkeeping used for gap detection
//! and idle eviction.

use log::{debug, trace};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::{Duration, Instant};

use crate::flow::codec::PacketHeader;
use crate::flow::{ExporterId, FieldSpec, Version};

/******************************** TEMPLATE ********************************/

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum TemplateKind {
    Data,
    Options { scope_field_count: u16 },
}

/// An ordered list of field specifiers describing the records of a data set.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Template {
    pub id: u16,             // Template id, always >= 256
    pub kind: TemplateKind,  // Data or options template
    pub fields: Vec<FieldSpec>, // Field specifiers in record order, scope fields first
}

impl Template {
    /// Width of one record, `None` when the template holds variable-length fields.
    pub fn record_length(&self) -> Option<usize> {
        self.fields
            .iter()
            .try_fold(0usize, |acc, f| if f.is_variable() { None } else { Some(acc + f.length as usize) })
    }

    /// Smallest possible record width. A variable-length field takes at least its length prefix.
    pub fn min_record_length(&self) -> usize {
        self.fields.iter().map(|f| if f.is_variable() { 1 } else { f.length as usize }).sum()
    }

    #[inline]
    pub fn is_options(&self) -> bool {
        matches!(self.kind, TemplateKind::Options { .. })
    }

    pub fn scope_field_count(&self) -> usize {
        match self.kind {
            TemplateKind::Options { scope_field_count } => scope_field_count as usize,
            TemplateKind::Data => 0,
        }
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "id: {}, ", self.id)?;
        match self.kind {
            TemplateKind::Data => write!(f, "data, ")?,
            TemplateKind::Options { scope_field_count } => write!(f, "options (scope: {}), ", scope_field_count)?,
        }
        write!(f, "fields: [")?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", field)?;
        }
        write!(f, "]")
    }
}

/******************************** EXPORTER CONTEXT ********************************/

#[derive(Debug, PartialEq, Eq, Clone)]
enum TemplateState {
    Defined(Template),
    Withdrawn,
}

/// A data set held back until its template shows up.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PendingDataSet {
    pub template_id: u16,
    pub header: PacketHeader, // Header of the packet the set arrived in
    pub payload: Vec<u8>,     // Set content, set header excluded
}

/// Result of `TemplateStore::upsert_template`.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum UpsertStatus {
    Created,
    Unchanged,
    Replaced,
}

#[derive(Debug, PartialEq, Eq)]
pub struct Upsert {
    pub status: UpsertStatus,
    pub replay: Vec<PendingDataSet>, // Buffered sets to decode with the new template, oldest first
    pub discarded: usize,            // Buffered sets dropped because they were framed for another layout
}

/// Snapshot of one context, read by the maintenance task.
#[derive(Debug, Clone)]
pub struct ExporterStats {
    pub templates_active: usize,
    pub pending: usize,
    pub last_sequence: Option<u32>,
    pub last_activity: Instant,
}

#[derive(Debug)]
pub struct ExporterContext {
    templates: HashMap<u16, TemplateState>,
    pending: VecDeque<PendingDataSet>,
    last_sequence: Option<u32>,
    expected_sequence: Option<u32>,
    last_activity: Instant,
}

impl ExporterContext {
    fn new(now: Instant) -> Self {
        ExporterContext {
            templates: HashMap::new(),
            pending: VecDeque::new(),
            last_sequence: None,
            expected_sequence: None,
            last_activity: now,
        }
    }

    /// Records the sequence number of `header`, returns true on a discontinuity.
    ///
    /// v5 counts flows, v9 counts packets. IPFIX counts data records, which would require
    /// the packet to be fully decoded first, so it is only recorded.
    fn observe_sequence(&mut self, header: &PacketHeader) -> bool {
        let gap = matches!(self.expected_sequence, Some(expected) if expected != header.sequence);

        self.last_sequence = Some(header.sequence);
        self.expected_sequence = match header.version {
            Version::NetflowV5 => Some(header.sequence.wrapping_add(header.length as u32)),
            Version::NetflowV9 => Some(header.sequence.wrapping_add(1)),
            Version::Ipfix => None,
        };

        gap
    }

    fn templates_active(&self) -> usize {
        self.templates.values().filter(|s| matches!(s, TemplateState::Defined(_))).count()
    }

    fn drain_pending(&mut self, template_id: u16) -> Vec<PendingDataSet> {
        let (matching, rest): (VecDeque<_>, VecDeque<_>) = self.pending.drain(..).partition(|p| p.template_id == template_id);
        self.pending = rest;
        matching.into_iter().collect()
    }
}

/******************************** STORE ********************************/

#[derive(Debug)]
pub struct TemplateStore {
    contexts: HashMap<ExporterId, ExporterContext>,
    pending_bound: usize,
}

impl TemplateStore {
    pub fn new(pending_bound: usize) -> Self {
        TemplateStore { contexts: HashMap::new(), pending_bound }
    }

    /// Marks activity for `exporter`, creating its context on first sight.
    pub fn touch(&mut self, exporter: ExporterId, now: Instant) {
        self.contexts
            .entry(exporter)
            .or_insert_with(|| {
                debug!("new exporter context {}", exporter);
                ExporterContext::new(now)
            })
            .last_activity = now;
    }

    /// Returns true when the packet sequence number does not follow the previous packet.
    pub fn observe_sequence(&mut self, exporter: ExporterId, header: &PacketHeader, now: Instant) -> bool {
        self.touch(exporter, now);
        self.contexts.get_mut(&exporter).map_or(false, |ctx| ctx.observe_sequence(header))
    }

    pub fn upsert_template(&mut self, exporter: ExporterId, template: Template, now: Instant) -> Upsert {
        self.touch(exporter, now);
        let ctx = match self.contexts.get_mut(&exporter) {
            Some(ctx) => ctx,
            None => return Upsert { status: UpsertStatus::Unchanged, replay: vec![], discarded: 0 },
        };

        let id = template.id;
        let previous = ctx.templates.insert(id, TemplateState::Defined(template.clone()));

        match previous {
            None => {
                debug!("{}: template created {}", exporter, template);
                let replay = ctx.drain_pending(id);
                Upsert { status: UpsertStatus::Created, replay, discarded: 0 }
            }
            Some(TemplateState::Defined(ref old)) if *old == template => {
                trace!("{}: template {} refreshed", exporter, id);
                Upsert { status: UpsertStatus::Unchanged, replay: vec![], discarded: 0 }
            }
            Some(TemplateState::Defined(_)) => {
                debug!("{}: template replaced {}", exporter, template);
                let discarded = ctx.drain_pending(id).len();
                Upsert { status: UpsertStatus::Replaced, replay: vec![], discarded }
            }
            Some(TemplateState::Withdrawn) => {
                debug!("{}: template redefined after withdrawal {}", exporter, template);
                let discarded = ctx.drain_pending(id).len();
                Upsert { status: UpsertStatus::Created, replay: vec![], discarded }
            }
        }
    }

    /// Returns true if a defined template was withdrawn.
    pub fn withdraw_template(&mut self, exporter: ExporterId, template_id: u16, now: Instant) -> bool {
        self.touch(exporter, now);
        match self.contexts.get_mut(&exporter) {
            Some(ctx) => match ctx.templates.get_mut(&template_id) {
                Some(state @ TemplateState::Defined(_)) => {
                    debug!("{}: template {} withdrawn", exporter, template_id);
                    *state = TemplateState::Withdrawn;
                    true
                }
                _ => false,
            },
            None => false,
        }
    }

    /// Withdraws every defined template of the given kind, returns how many were withdrawn.
    pub fn withdraw_all(&mut self, exporter: ExporterId, options: bool, now: Instant) -> usize {
        self.touch(exporter, now);
        let ctx = match self.contexts.get_mut(&exporter) {
            Some(ctx) => ctx,
            None => return 0,
        };

        let mut count = 0;
        for state in ctx.templates.values_mut() {
            if let TemplateState::Defined(t) = state {
                if t.is_options() == options {
                    *state = TemplateState::Withdrawn;
                    count += 1;
                }
            }
        }

        debug!("{}: {} {} withdrawn", exporter, count, if options { "options templates" } else { "templates" });
        count
    }

    pub fn lookup(&self, exporter: &ExporterId, template_id: u16) -> Option<&Template> {
        match self.contexts.get(exporter)?.templates.get(&template_id)? {
            TemplateState::Defined(t) => Some(t),
            TemplateState::Withdrawn => None,
        }
    }

    /// Holds a data set for a template not yet defined. Returns the oldest buffered set
    /// when the bound is exceeded.
    pub fn buffer_pending(&mut self, exporter: ExporterId, pending: PendingDataSet, now: Instant) -> Option<PendingDataSet> {
        self.touch(exporter, now);
        let bound = self.pending_bound;
        let ctx = self.contexts.get_mut(&exporter)?;

        if bound == 0 {
            return Some(pending);
        }

        ctx.pending.push_back(pending);
        if ctx.pending.len() > bound {
            ctx.pending.pop_front()
        } else {
            None
        }
    }

    pub fn stats(&self, exporter: &ExporterId) -> Option<ExporterStats> {
        self.contexts.get(exporter).map(|ctx| ExporterStats {
            templates_active: ctx.templates_active(),
            pending: ctx.pending.len(),
            last_sequence: ctx.last_sequence,
            last_activity: ctx.last_activity,
        })
    }

    /// Removes the contexts without activity for `threshold` and returns their identities.
    pub fn evict_idle(&mut self, now: Instant, threshold: Duration) -> Vec<ExporterId> {
        let idle: Vec<ExporterId> = self
            .contexts
            .iter()
            .filter(|(_, ctx)| now.saturating_duration_since(ctx.last_activity) >= threshold)
            .map(|(id, _)| *id)
            .collect();

        for id in &idle {
            self.contexts.remove(id);
            debug!("exporter context {} evicted after {:?} idle", id, threshold);
        }

        idle
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::net::SocketAddr;

    fn exporter(port: u16, domain_id: u32) -> ExporterId {
        ExporterId::new(SocketAddr::from(([192, 0, 2, 1], port)), domain_id)
    }

    fn template(id: u16, fields: Vec<FieldSpec>) -> Template {
        Template { id, kind: TemplateKind::Data, fields }
    }

    fn header(version: Version, length: u16, sequence: u32) -> PacketHeader {
        PacketHeader { version, length, sys_uptime: 0, export_time: 0, export_nanos: 0, sequence, domain_id: 0, sampling: 0 }
    }

    fn pending(template_id: u16, tag: u8) -> PendingDataSet {
        PendingDataSet { template_id, header: header(Version::NetflowV9, 1, 0), payload: vec![tag; 4] }
    }

    #[test]
    fn record_lengths() {
        let fixed = template(256, vec![FieldSpec::new(8, 4), FieldSpec::new(7, 2)]);
        assert_eq!(fixed.record_length(), Some(6));
        assert_eq!(fixed.min_record_length(), 6);

        let variable = template(257, vec![FieldSpec::new(8, 4), FieldSpec::new(82, FieldSpec::VARIABLE_LENGTH)]);
        assert_eq!(variable.record_length(), None);
        assert_eq!(variable.min_record_length(), 5);
    }

    #[test]
    fn upsert_lifecycle() {
        let now = Instant::now();
        let mut store = TemplateStore::new(8);
        let id = exporter(2055, 1);
        let t = template(256, vec![FieldSpec::new(8, 4)]);

        assert_eq!(store.upsert_template(id, t.clone(), now).status, UpsertStatus::Created);
        assert_eq!(store.upsert_template(id, t.clone(), now).status, UpsertStatus::Unchanged);
        assert_eq!(store.lookup(&id, 256), Some(&t));

        let t2 = template(256, vec![FieldSpec::new(8, 4), FieldSpec::new(12, 4)]);
        assert_eq!(store.upsert_template(id, t2.clone(), now).status, UpsertStatus::Replaced);
        assert_eq!(store.lookup(&id, 256), Some(&t2));

        assert!(store.withdraw_template(id, 256, now));
        assert!(!store.withdraw_template(id, 256, now));
        assert_eq!(store.lookup(&id, 256), None);
        assert_eq!(store.stats(&id).map_or(0, |s| s.templates_active), 0);

        assert_eq!(store.upsert_template(id, t.clone(), now).status, UpsertStatus::Created);
        assert_eq!(store.lookup(&id, 256), Some(&t));
    }

    #[test]
    fn exporters_are_isolated() {
        let now = Instant::now();
        let mut store = TemplateStore::new(8);
        let a = exporter(2055, 1);
        let b = exporter(2056, 1);

        store.upsert_template(a, template(256, vec![FieldSpec::new(8, 4)]), now);
        store.upsert_template(b, template(256, vec![FieldSpec::new(7, 2)]), now);

        assert_eq!(store.lookup(&a, 256).unwrap().fields[0].type_code, 8);
        assert_eq!(store.lookup(&b, 256).unwrap().fields[0].type_code, 7);
        assert_eq!(store.lookup(&exporter(2055, 2), 256), None);
    }

    #[test]
    fn pending_buffer_is_bounded_fifo() {
        let now = Instant::now();
        let mut store = TemplateStore::new(2);
        let id = exporter(2055, 0);

        assert_eq!(store.buffer_pending(id, pending(300, 1), now), None);
        assert_eq!(store.buffer_pending(id, pending(301, 2), now), None);
        assert_eq!(store.buffer_pending(id, pending(300, 3), now), Some(pending(300, 1)));
        assert_eq!(store.stats(&id).map_or(0, |s| s.pending), 2);
    }

    #[test]
    fn created_template_replays_pending_in_order() {
        let now = Instant::now();
        let mut store = TemplateStore::new(8);
        let id = exporter(2055, 0);

        store.buffer_pending(id, pending(300, 1), now);
        store.buffer_pending(id, pending(301, 2), now);
        store.buffer_pending(id, pending(300, 3), now);

        let upsert = store.upsert_template(id, template(300, vec![FieldSpec::new(8, 4)]), now);
        assert_eq!(upsert.status, UpsertStatus::Created);
        assert_eq!(upsert.replay, vec![pending(300, 1), pending(300, 3)]);
        assert_eq!(store.stats(&id).map_or(0, |s| s.pending), 1);
    }

    #[test]
    fn redefinition_discards_pending() {
        let now = Instant::now();
        let mut store = TemplateStore::new(8);
        let id = exporter(2055, 0);

        store.upsert_template(id, template(300, vec![FieldSpec::new(8, 4)]), now);
        store.withdraw_template(id, 300, now);
        store.buffer_pending(id, pending(300, 1), now);

        let upsert = store.upsert_template(id, template(300, vec![FieldSpec::new(8, 4)]), now);
        assert_eq!(upsert.status, UpsertStatus::Created);
        assert!(upsert.replay.is_empty());
        assert_eq!(upsert.discarded, 1);
    }

    #[test]
    fn withdraw_all_by_kind() {
        let now = Instant::now();
        let mut store = TemplateStore::new(8);
        let id = exporter(4739, 7);

        store.upsert_template(id, template(256, vec![FieldSpec::new(8, 4)]), now);
        store.upsert_template(id, template(257, vec![FieldSpec::new(8, 4)]), now);
        store.upsert_template(
            id,
            Template { id: 258, kind: TemplateKind::Options { scope_field_count: 1 }, fields: vec![FieldSpec::new(144, 4)] },
            now,
        );

        assert_eq!(store.withdraw_all(id, false, now), 2);
        assert_eq!(store.stats(&id).map_or(0, |s| s.templates_active), 1);
        assert!(store.lookup(&id, 258).is_some());
    }

    #[test]
    fn sequence_gaps() {
        let now = Instant::now();
        let mut store = TemplateStore::new(8);
        let id = exporter(2055, 0);

        assert!(!store.observe_sequence(id, &header(Version::NetflowV5, 30, 100), now));
        assert!(!store.observe_sequence(id, &header(Version::NetflowV5, 2, 130), now));
        assert!(store.observe_sequence(id, &header(Version::NetflowV5, 2, 140), now));

        let v9 = exporter(2056, 0);
        assert!(!store.observe_sequence(v9, &header(Version::NetflowV9, 5, 7), now));
        assert!(!store.observe_sequence(v9, &header(Version::NetflowV9, 5, 8), now));
        assert!(store.observe_sequence(v9, &header(Version::NetflowV9, 5, 10), now));

        let ipfix = exporter(4739, 0);
        assert!(!store.observe_sequence(ipfix, &header(Version::Ipfix, 100, 7), now));
        assert!(!store.observe_sequence(ipfix, &header(Version::Ipfix, 100, 900), now));
        assert_eq!(store.stats(&ipfix).unwrap().last_sequence, Some(900));
    }

    #[test]
    fn evict_idle_contexts() {
        let start = Instant::now();
        let mut store = TemplateStore::new(8);
        let old = exporter(2055, 0);
        let fresh = exporter(2056, 0);

        store.touch(old, start);
        store.touch(fresh, start + Duration::from_secs(50));

        let evicted = store.evict_idle(start + Duration::from_secs(60), Duration::from_secs(30));
        assert_eq!(evicted, vec![old]);
        assert!(store.stats(&old).is_none());
        assert!(store.stats(&fresh).is_some());
        assert!(!store.is_empty());
    }
}
