//! Topology engine.
//!
//! The engine owns every piece of mutable state of a session: the VLAN
//! counter, the tap slots bound on each VM, the recorded groups and the
//! interconnections. Operations validate first, allocate under `&mut self`,
//! then hand the allocated endpoints to the remote layer.
//!
//! Allocations are never rolled back. A link that failed to apply keeps its
//! VLAN id and tap slots; only [`TopologyEngine::reset`] frees them, after
//! tearing the taps down on the workers.

pub mod apply;
pub mod report;

use std::collections::{BTreeMap, HashMap};

use log::{info, warn};

use crate::alloc::{tap_name, TapAllocator, VlanAllocator, VlanId, DEFAULT_VLAN_START, MAX_IFNAME_LEN};
use crate::config::Config;
use crate::error::{StateConflictError, TopologyError, ValidationError};
use crate::inventory::{Inventory, Worker};
use crate::remote::HostConnector;
use crate::render::TopologyGraph;
use crate::topology::{
    plan, union_edges, CompositeRequest, Edge, Endpoint, GroupRequest, Interconnection, Link, Plan,
    PlannerOptions, SharedSegment, TopologyGroup, TopologyKind,
};
use apply::{run_jobs, Job, Mode};
pub use report::{ApplyReport, LinkReport, RemoteAction, StepOutcome, StepRecord};

/// Engine settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    pub planner: PlannerOptions,
    pub vlan_start: VlanId,
    /// Run per-worker batches concurrently
    pub parallel: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            planner: PlannerOptions::default(),
            vlan_start: DEFAULT_VLAN_START,
            parallel: true,
        }
    }
}

impl From<&Config> for EngineOptions {
    fn from(config: &Config) -> Self {
        EngineOptions {
            planner: config.planner_options(),
            vlan_start: config.general.vlan_start,
            parallel: config.general.parallel,
        }
    }
}

/// A group applied by [`TopologyEngine::define_simple`]
#[derive(Debug, Clone)]
pub struct GroupOutcome {
    pub group: TopologyGroup,
    pub report: ApplyReport,
}

/// Every group of a composite request, in request order
#[derive(Debug, Clone)]
pub struct CompositeOutcome {
    pub groups: Vec<GroupOutcome>,
    /// Union of all planned edges, for visualization only
    pub overlay: Vec<Edge>,
}

impl CompositeOutcome {
    pub fn report(&self) -> ApplyReport {
        let mut report = ApplyReport::default();
        for outcome in &self.groups {
            report.merge(outcome.report.clone());
        }
        report
    }
}

/// Result of [`TopologyEngine::interconnect`]
#[derive(Debug, Clone)]
pub struct InterconnectOutcome {
    pub interconnection: Interconnection,
    /// False when a remote step failed; the link was then not recorded
    pub recorded: bool,
    pub report: ApplyReport,
}

/// Where a VM lives, resolved before anything is allocated
#[derive(Debug, Clone)]
struct Placement {
    worker: Worker,
    tap_base: String,
}

/// Orchestrates topology groups and interconnections over an inventory
pub struct TopologyEngine<C> {
    inventory: Inventory,
    connector: C,
    options: EngineOptions,
    vlans: VlanAllocator,
    taps: TapAllocator,
    groups: Vec<TopologyGroup>,
    interconnections: Vec<Interconnection>,
    /// Interconnections that failed to apply; their taps may still exist
    unrecorded: Vec<Interconnection>,
    /// Taps whose teardown failed; retried by the next teardown of their VM
    stranded: Vec<(Endpoint, VlanId)>,
}

impl<C: HostConnector> TopologyEngine<C> {
    pub fn new(inventory: Inventory, connector: C, options: EngineOptions) -> Self {
        TopologyEngine {
            inventory,
            connector,
            vlans: VlanAllocator::new(options.vlan_start),
            taps: TapAllocator::new(),
            options,
            groups: Vec::new(),
            interconnections: Vec::new(),
            unrecorded: Vec::new(),
            stranded: Vec::new(),
        }
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    /// Tears down the taps bound on a VM, then removes it from the inventory.
    ///
    /// Recorded groups and interconnections keep referencing the VM, and its
    /// slots stay bound, until [`TopologyEngine::reset`]. Returns `None` for
    /// a VM that is not in the inventory.
    pub fn remove_vm(&mut self, name: &str) -> Option<ApplyReport> {
        if !self.inventory.contains(name) {
            return None;
        }
        let endpoints: Vec<(&Endpoint, VlanId)> = self
            .bound_endpoints()
            .into_iter()
            .chain(self.stranded.iter().map(|(endpoint, vlan)| (endpoint, *vlan)))
            .filter(|(endpoint, _)| endpoint.vm == name)
            .collect();
        info!("Removing {}: tearing down {} taps", name, endpoints.len());
        let (torn_down, report) = self.teardown(&endpoints);
        self.inventory.remove(name);
        self.stranded.retain(|(endpoint, _)| endpoint.vm != name);
        if !report.is_success() {
            warn!("{}: {} teardown steps failed", name, report.failure_count());
            self.stranded.extend(failed_teardowns(torn_down, &report));
        }
        Some(report)
    }

    pub fn vlans(&self) -> &VlanAllocator {
        &self.vlans
    }

    pub fn taps(&self) -> &TapAllocator {
        &self.taps
    }

    pub fn groups(&self) -> &[TopologyGroup] {
        &self.groups
    }

    pub fn interconnections(&self) -> &[Interconnection] {
        &self.interconnections
    }

    /// Plain graph of everything configured so far
    pub fn graph(&self) -> TopologyGraph {
        TopologyGraph::from_records(&self.groups, &self.interconnections)
    }

    /// Groups that contain `vm`
    pub fn groups_of<'a>(&'a self, vm: &'a str) -> impl Iterator<Item = &'a TopologyGroup> + 'a {
        self.groups.iter().filter(move |g| g.contains(vm))
    }

    /// Tears down every bound tap, forgets all groups and interconnections,
    /// and rewinds the allocators.
    ///
    /// Slots whose tap could not be torn down stay bound. The VLAN counter is
    /// rewound only when every teardown step succeeded, so a tag left behind
    /// on a worker is never handed out again.
    pub fn reset(&mut self) -> ApplyReport {
        info!(
            "Resetting engine: dropping {} groups and {} interconnections",
            self.groups.len(),
            self.interconnections.len()
        );
        // Taps of removed VMs were torn down by `remove_vm`
        let mut endpoints: Vec<(&Endpoint, VlanId)> = self
            .bound_endpoints()
            .into_iter()
            .filter(|(endpoint, _)| self.inventory.contains(&endpoint.vm))
            .collect();
        endpoints.extend(self.stranded.iter().map(|(endpoint, vlan)| (endpoint, *vlan)));
        let (torn_down, report) = self.teardown(&endpoints);
        let stuck = failed_teardowns(torn_down, &report);

        self.groups.clear();
        self.interconnections.clear();
        self.unrecorded.clear();
        self.taps.reset();
        for (endpoint, _) in &stuck {
            self.taps.mark_used(&endpoint.vm, endpoint.slot);
        }
        let stuck_count = stuck.len();
        self.stranded = stuck;
        if report.is_success() {
            self.vlans.reset();
        } else {
            warn!(
                "Reset left {} taps in place; VLAN ids are not rewound",
                stuck_count
            );
        }
        report
    }

    /// Plans a request without allocating anything or contacting hosts
    pub fn preview(&self, request: &CompositeRequest) -> Result<Vec<Plan>, ValidationError> {
        request.validate()?;
        request
            .groups
            .iter()
            .map(|g| self.plan_group(g))
            .collect()
    }

    /// Materializes one simple topology over `members`.
    ///
    /// Remote failures are reported, not returned as errors; the group is
    /// recorded either way.
    pub fn define_simple(&mut self, kind: TopologyKind, members: &[String]) -> Result<GroupOutcome, TopologyError> {
        let plan = self.plan_group(&GroupRequest::new(kind, members.to_vec()))?;
        self.vlans.reserve(plan.vlan_count())?;
        let placements = self.resolve(&plan.members)?;
        self.check_tap_names(&tap_demand(std::slice::from_ref(&plan)), &placements)?;
        self.apply_plan(plan, &placements)
    }

    /// Materializes several groups sharing the allocators.
    ///
    /// Every group is validated before the first one is applied. Remote
    /// failures in one group do not stop the following groups.
    pub fn define_composite(&mut self, request: &CompositeRequest) -> Result<CompositeOutcome, TopologyError> {
        let plans = self.preview(request)?;
        let vlan_count = plans.iter().map(Plan::vlan_count).sum();
        self.vlans.reserve(vlan_count)?;
        let placements = self.resolve(&request.vms())?;
        self.check_tap_names(&tap_demand(&plans), &placements)?;

        let overlay = union_edges(&plans);
        let groups = plans
            .into_iter()
            .map(|plan| self.apply_plan(plan, &placements))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(CompositeOutcome { groups, overlay })
    }

    /// Adds one link between two already grouped VMs.
    ///
    /// Linking two members of the same group needs `confirm_same_group`. The
    /// interconnection is recorded only when every remote step succeeded.
    pub fn interconnect(
        &mut self,
        vm_a: &str,
        vm_b: &str,
        confirm_same_group: bool,
    ) -> Result<InterconnectOutcome, TopologyError> {
        if vm_a == vm_b {
            return Err(ValidationError::SelfLink(vm_a.to_string()).into());
        }
        for vm in [vm_a, vm_b] {
            if !self.inventory.contains(vm) {
                return Err(StateConflictError::UnknownVm(vm.to_string()).into());
            }
            if self.groups_of(vm).next().is_none() {
                return Err(StateConflictError::Ungrouped(vm.to_string()).into());
            }
        }

        if let Some(shared) = self.groups.iter().find(|g| g.contains(vm_a) && g.contains(vm_b)) {
            if !confirm_same_group {
                return Err(StateConflictError::SameGroup {
                    a: vm_a.to_string(),
                    b: vm_b.to_string(),
                    group: shared.id,
                }
                .into());
            }
            warn!(
                "{} and {} both belong to group {} ({}); linking them anyway",
                vm_a, vm_b, shared.id, shared.kind
            );
        }

        self.vlans.reserve(1)?;
        let placements = self.resolve(&[vm_a.to_string(), vm_b.to_string()])?;
        self.check_tap_names(&BTreeMap::from([(vm_a, 1), (vm_b, 1)]), &placements)?;

        let vlan = self.vlans.next()?;
        let a = self.bind(vm_a, &placements);
        let b = self.bind(vm_b, &placements);
        let jobs = vec![job_for(&a, vlan, &placements), job_for(&b, vlan, &placements)];
        let mut report = self.run(&jobs, Mode::Configure);
        report.links.push(link_report(vlan, &a, &b, &report, 0, 1));

        let interconnection = Interconnection { vlan, a, b };
        let recorded = report.is_success();
        if recorded {
            info!(
                "Interconnected {} <-> {} on VLAN {}",
                interconnection.a.vm, interconnection.b.vm, vlan
            );
            self.interconnections.push(interconnection.clone());
        } else {
            warn!(
                "Interconnection {} <-> {} on VLAN {} failed; not recorded",
                interconnection.a.vm, interconnection.b.vm, vlan
            );
            self.unrecorded.push(interconnection.clone());
        }

        Ok(InterconnectOutcome {
            interconnection,
            recorded,
            report,
        })
    }

    fn plan_group(&self, request: &GroupRequest) -> Result<Plan, ValidationError> {
        if request.members.is_empty() {
            return Err(ValidationError::EmptySubset);
        }
        if let Some(unknown) = self.inventory.first_unknown(&request.members) {
            return Err(ValidationError::UnknownVm(unknown.clone()));
        }
        plan(request.kind, &request.members, &self.options.planner)
    }

    fn resolve(&self, names: &[String]) -> Result<HashMap<String, Placement>, TopologyError> {
        let mut placements = HashMap::new();
        for name in names {
            let vm = self
                .inventory
                .vm(name)
                .ok_or_else(|| ValidationError::UnknownVm(name.clone()))?;
            let worker = self
                .inventory
                .worker(&vm.worker)
                .ok_or_else(|| StateConflictError::UnknownWorker {
                    vm: name.clone(),
                    worker: vm.worker.clone(),
                })?;
            placements.insert(
                name.clone(),
                Placement {
                    worker: worker.clone(),
                    tap_base: vm.tap_base.clone(),
                },
            );
        }
        Ok(placements)
    }

    /// Fails if binding `demand[vm]` more slots would give any VM a tap name
    /// longer than the kernel accepts.
    fn check_tap_names(
        &self,
        demand: &BTreeMap<&str, usize>,
        placements: &HashMap<String, Placement>,
    ) -> Result<(), ValidationError> {
        for (&vm, &count) in demand {
            let Some(&highest) = self.taps.preview_slots(vm, count).last() else {
                continue;
            };
            let tap = tap_name(&placements[vm].tap_base, highest);
            if tap.len() > MAX_IFNAME_LEN {
                return Err(ValidationError::TapNameTooLong {
                    tap,
                    max: MAX_IFNAME_LEN,
                });
            }
        }
        Ok(())
    }

    /// Every endpoint bound on a worker, with the VLAN it was tagged with
    fn bound_endpoints(&self) -> Vec<(&Endpoint, VlanId)> {
        let mut endpoints = Vec::new();
        for group in &self.groups {
            for link in &group.links {
                endpoints.push((&link.a, link.vlan));
                endpoints.push((&link.b, link.vlan));
            }
            if let Some(segment) = &group.segment {
                endpoints.extend(segment.ports.iter().map(|port| (port, segment.vlan)));
            }
        }
        for link in self.interconnections.iter().chain(&self.unrecorded) {
            endpoints.push((&link.a, link.vlan));
            endpoints.push((&link.b, link.vlan));
        }
        endpoints
    }

    /// Untags and deletes the given taps. Returns the endpoints actually sent
    /// to a worker; the report holds two steps for each, in the same order.
    fn teardown(&self, endpoints: &[(&Endpoint, VlanId)]) -> (Vec<(Endpoint, VlanId)>, ApplyReport) {
        let mut torn_down = Vec::new();
        let mut jobs = Vec::new();
        for &(endpoint, vlan) in endpoints {
            let Some(worker) = self.inventory.worker(&endpoint.worker) else {
                warn!(
                    "Cannot tear down {} of {}: unknown worker {}",
                    endpoint.tap, endpoint.vm, endpoint.worker
                );
                continue;
            };
            jobs.push(Job {
                vm: endpoint.vm.clone(),
                worker: worker.clone(),
                tap: endpoint.tap.clone(),
                vlan,
            });
            torn_down.push((endpoint.clone(), vlan));
        }
        (torn_down, self.run(&jobs, Mode::Teardown))
    }

    /// Takes the next tap slot of `vm`.
    fn bind(&mut self, vm: &str, placements: &HashMap<String, Placement>) -> Endpoint {
        let slot = self.taps.next_slot(vm);
        let placement = &placements[vm];
        Endpoint {
            vm: vm.to_string(),
            worker: placement.worker.name.clone(),
            slot,
            tap: tap_name(&placement.tap_base, slot),
        }
    }

    fn run(&self, jobs: &[Job], mode: Mode) -> ApplyReport {
        let steps = run_jobs(&self.connector, jobs, mode, self.options.parallel);
        ApplyReport {
            steps: steps.into_iter().flatten().collect(),
            links: Vec::new(),
        }
    }

    /// Allocates, applies and records one validated plan.
    fn apply_plan(
        &mut self,
        plan: Plan,
        placements: &HashMap<String, Placement>,
    ) -> Result<GroupOutcome, TopologyError> {
        let id = self.groups.len() + 1;
        let vlan_ids = (0..plan.vlan_count())
            .map(|_| self.vlans.next())
            .collect::<Result<Vec<VlanId>, _>>()?;
        let first_vlan = vlan_ids.first().copied().unwrap_or(self.options.vlan_start);

        let mut jobs = Vec::new();
        let mut links = Vec::new();
        let mut segment = None;

        if plan.kind.is_shared() {
            let vlan = first_vlan;
            let ports: Vec<Endpoint> = plan.members.iter().map(|vm| self.bind(vm, placements)).collect();
            jobs.extend(ports.iter().map(|p| job_for(p, vlan, placements)));
            segment = Some(SharedSegment { vlan, ports });
        } else {
            for (edge, &vlan) in plan.edges.iter().zip(&vlan_ids) {
                let a = self.bind(&edge.a, placements);
                let b = self.bind(&edge.b, placements);
                jobs.push(job_for(&a, vlan, placements));
                jobs.push(job_for(&b, vlan, placements));
                links.push(Link { vlan, a, b });
            }
        }

        info!(
            "Group {}: {} over {} VMs, {} links, VLANs from {}",
            id,
            plan.kind,
            plan.members.len(),
            links.len(),
            first_vlan
        );

        let mut report = self.run(&jobs, Mode::Configure);
        let link_reports: Vec<LinkReport> = links
            .iter()
            .enumerate()
            .map(|(i, link)| link_report(link.vlan, &link.a, &link.b, &report, 2 * i, 2 * i + 1))
            .collect();
        report.links = link_reports;

        if !report.is_success() {
            warn!("Group {}: {} remote steps failed", id, report.failure_count());
        }

        let group = TopologyGroup {
            id,
            kind: plan.kind,
            members: plan.members,
            first_vlan,
            links,
            segment,
            detached: plan.detached,
        };
        self.groups.push(group.clone());
        Ok(GroupOutcome { group, report })
    }
}

/// Endpoints from a teardown whose steps did not all succeed
fn failed_teardowns(torn_down: Vec<(Endpoint, VlanId)>, report: &ApplyReport) -> Vec<(Endpoint, VlanId)> {
    torn_down
        .into_iter()
        .zip(report.steps.chunks(2))
        .filter(|(_, steps)| !steps.iter().all(StepRecord::is_done))
        .map(|(endpoint, _)| endpoint)
        .collect()
}

/// Tap slots each VM needs for a set of plans: one per edge end, one per
/// bus membership.
fn tap_demand(plans: &[Plan]) -> BTreeMap<&str, usize> {
    let mut demand = BTreeMap::new();
    for plan in plans {
        if plan.kind.is_shared() {
            for vm in &plan.members {
                *demand.entry(vm.as_str()).or_default() += 1;
            }
        } else {
            for edge in &plan.edges {
                *demand.entry(edge.a.as_str()).or_default() += 1;
                *demand.entry(edge.b.as_str()).or_default() += 1;
            }
        }
    }
    demand
}

fn job_for(endpoint: &Endpoint, vlan: VlanId, placements: &HashMap<String, Placement>) -> Job {
    Job {
        vm: endpoint.vm.clone(),
        worker: placements[&endpoint.vm].worker.clone(),
        tap: endpoint.tap.clone(),
        vlan,
    }
}

/// Steps of job `i` are at `3i..3i+3` in the report.
fn link_report(vlan: VlanId, a: &Endpoint, b: &Endpoint, report: &ApplyReport, job_a: usize, job_b: usize) -> LinkReport {
    let job_ok = |job: usize| {
        report
            .steps
            .get(3 * job..3 * job + 3)
            .map_or(false, |steps| steps.iter().all(StepRecord::is_done))
    };
    LinkReport {
        vlan,
        a: a.vm.clone(),
        b: b.vm.clone(),
        tap_a: a.tap.clone(),
        tap_b: b.tap.clone(),
        ok: job_ok(job_a) && job_ok(job_b),
    }
}
