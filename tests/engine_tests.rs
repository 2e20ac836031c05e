//! Engine behaviour against a recording connector.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use vtopo::alloc::{VlanId, MAX_IFNAME_LEN};
use vtopo::engine::{EngineOptions, StepOutcome, TopologyEngine};
use vtopo::error::{StateConflictError, TopologyError, ValidationError};
use vtopo::inventory::{default_tap_base, Inventory, Vm, Worker};
use vtopo::remote::{HostConnector, RemoteConfigExecutor, RemoteError};
use vtopo::shell::Session;
use vtopo::topology::{CompositeRequest, Edge, GroupRequest, TopologyKind};

/// Records every remote call and the tag each tap carries; fails the taps
/// and workers it is told to.
#[derive(Default)]
struct RecordingConnector {
    calls: Mutex<Vec<String>>,
    tags: Mutex<BTreeMap<String, VlanId>>,
    unreachable: HashSet<String>,
    failing_taps: HashSet<String>,
    /// Taps that cannot be deleted
    stuck_taps: HashSet<String>,
}

impl RecordingConnector {
    fn unreachable(worker: &str) -> Self {
        RecordingConnector {
            unreachable: [worker.to_string()].into(),
            ..Default::default()
        }
    }

    fn failing(tap: &str) -> Self {
        RecordingConnector {
            failing_taps: [tap.to_string()].into(),
            ..Default::default()
        }
    }

    fn stuck(tap: &str) -> Self {
        RecordingConnector {
            stuck_taps: [tap.to_string()].into(),
            ..Default::default()
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Tagged taps as the workers see them
    fn tags(&self) -> BTreeMap<String, VlanId> {
        self.tags.lock().unwrap().clone()
    }
}

struct RecordingExecutor<'a> {
    worker: String,
    parent: &'a RecordingConnector,
}

impl RecordingExecutor<'_> {
    fn log(&self, call: String) {
        self.parent.calls.lock().unwrap().push(format!("{} {}", self.worker, call));
    }
}

impl HostConnector for RecordingConnector {
    fn connect(&self, worker: &Worker) -> Result<Box<dyn RemoteConfigExecutor + '_>, RemoteError> {
        if self.unreachable.contains(&worker.name) {
            return Err(RemoteError::Connect {
                worker: worker.name.clone(),
                reason: "connection refused".to_string(),
            });
        }
        Ok(Box::new(RecordingExecutor {
            worker: worker.name.clone(),
            parent: self,
        }))
    }
}

impl RemoteConfigExecutor for RecordingExecutor<'_> {
    fn ensure_tap_exists(&mut self, vm: &str, tap: &str) -> Result<bool, RemoteError> {
        self.log(format!("ensure {} {}", vm, tap));
        Ok(true)
    }

    fn set_port_vlan(&mut self, tap: &str, vlan: VlanId) -> Result<(), RemoteError> {
        self.log(format!("set {} {}", tap, vlan));
        if self.parent.failing_taps.contains(tap) {
            return Err(RemoteError::Command {
                command: format!("ovs-vsctl set port {} tag={}", tap, vlan),
                status: 1,
                output: "no port named".to_string(),
            });
        }
        self.parent.tags.lock().unwrap().insert(tap.to_string(), vlan);
        Ok(())
    }

    fn clear_port_vlan(&mut self, tap: &str) -> Result<(), RemoteError> {
        self.log(format!("clear {}", tap));
        self.parent.tags.lock().unwrap().remove(tap);
        Ok(())
    }

    fn remove_tap(&mut self, tap: &str) -> Result<(), RemoteError> {
        self.log(format!("remove {}", tap));
        if self.parent.stuck_taps.contains(tap) {
            return Err(RemoteError::Command {
                command: format!("ovs-vsctl --if-exists del-port br-int {}", tap),
                status: 1,
                output: "device busy".to_string(),
            });
        }
        self.parent.tags.lock().unwrap().remove(tap);
        Ok(())
    }
}

/// VM1..VM9, odd VMs on worker1, even VMs on worker2
fn inventory() -> Inventory {
    inventory_of(9)
}

fn inventory_of(count: u16) -> Inventory {
    let workers = (1..=2)
        .map(|i| Worker {
            name: format!("worker{}", i),
            address: format!("10.0.10.{}", i),
            ssh_port: 5800 + i,
            cpus: 8,
            ram_mb: 8192,
        })
        .collect();
    let vms = (1..=count)
        .map(|i| {
            let name = format!("VM{}", i);
            Vm {
                worker: if i % 2 == 1 { "worker1" } else { "worker2" }.to_string(),
                tap_base: default_tap_base("br-int", &name),
                cpus: 1,
                ram_mb: 512,
                disk_gb: 1,
                vnc_port: i,
                mac: format!("20:19:37:33:ee:{:02x}", i),
                name,
            }
        })
        .collect();
    Inventory::new(workers, vms)
}

fn engine(connector: &RecordingConnector) -> TopologyEngine<&RecordingConnector> {
    TopologyEngine::new(inventory(), connector, EngineOptions::default())
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_linear_pair() {
    let connector = RecordingConnector::default();
    let mut engine = engine(&connector);

    let outcome = engine.define_simple(TopologyKind::Linear, &names(&["VM2", "VM1"])).unwrap();
    assert_eq!(outcome.group.links.len(), 1);
    let link = &outcome.group.links[0];
    assert_eq!(link.edge(), Edge::new("VM1", "VM2"));
    assert_eq!(link.vlan, 100);
    assert_eq!(link.a.tap, "br-int-VM1-tap2");
    assert_eq!(link.b.tap, "br-int-VM2-tap2");

    assert!(outcome.report.is_success());
    assert_eq!(outcome.report.links.len(), 1);
    assert!(outcome.report.links[0].ok);
    assert_eq!(engine.vlans().peek(), Some(101));

    let mut calls = connector.calls();
    calls.sort();
    assert_eq!(
        calls,
        vec![
            "worker1 clear br-int-VM1-tap2",
            "worker1 ensure VM1 br-int-VM1-tap2",
            "worker1 set br-int-VM1-tap2 100",
            "worker2 clear br-int-VM2-tap2",
            "worker2 ensure VM2 br-int-VM2-tap2",
            "worker2 set br-int-VM2-tap2 100",
        ]
    );
}

#[test]
fn test_steps_per_tap_run_in_order() {
    let connector = RecordingConnector::default();
    let mut engine = engine(&connector);
    engine.define_simple(TopologyKind::Linear, &names(&["VM1", "VM3"])).unwrap();

    // Both VMs live on worker1, so the whole batch is sequential
    assert_eq!(
        connector.calls(),
        vec![
            "worker1 ensure VM1 br-int-VM1-tap2",
            "worker1 clear br-int-VM1-tap2",
            "worker1 set br-int-VM1-tap2 100",
            "worker1 ensure VM3 br-int-VM3-tap2",
            "worker1 clear br-int-VM3-tap2",
            "worker1 set br-int-VM3-tap2 100",
        ]
    );
}

#[test]
fn test_bus_shares_one_vlan() {
    let connector = RecordingConnector::default();
    let mut engine = engine(&connector);

    let outcome = engine
        .define_simple(TopologyKind::Bus, &names(&["VM3", "VM1", "VM2"]))
        .unwrap();
    let segment = outcome.group.segment.as_ref().unwrap();
    assert_eq!(segment.vlan, 100);
    assert_eq!(segment.ports.len(), 3);
    assert!(outcome.group.links.is_empty());
    assert_eq!(outcome.report.tap_ensures().count(), 3);
    assert!(outcome.report.links.is_empty());
    assert_eq!(engine.vlans().peek(), Some(101));
}

#[test]
fn test_ring_and_tree_shapes() {
    let connector = RecordingConnector::default();
    let mut engine = engine(&connector);

    let ring = engine
        .define_simple(TopologyKind::Ring, &names(&["VM1", "VM2", "VM3", "VM4"]))
        .unwrap();
    assert_eq!(ring.group.vlans(), vec![100, 101, 102, 103]);
    assert_eq!(ring.group.links[3].edge(), Edge::new("VM4", "VM1"));

    let members = names(&["VM1", "VM2", "VM3", "VM4", "VM5", "VM6", "VM7", "VM8"]);
    let tree = engine.define_simple(TopologyKind::Tree, &members).unwrap();
    assert_eq!(tree.group.links.len(), 6);
    assert_eq!(tree.group.detached, vec!["VM8"]);
    assert_eq!(tree.group.first_vlan, 104);
    assert_eq!(tree.group.links[0].edge(), Edge::new("VM1", "VM2"));
    assert_eq!(tree.group.links[5].edge(), Edge::new("VM3", "VM7"));
    // VM1 already holds two ring taps
    assert_eq!(tree.group.links[0].a.slot, 4);
}

#[test]
fn test_validation_leaves_state_untouched() {
    let connector = RecordingConnector::default();
    let mut engine = engine(&connector);

    let err = engine.define_simple(TopologyKind::Ring, &names(&["VM1"])).unwrap_err();
    assert!(matches!(
        err,
        TopologyError::Validation(ValidationError::BelowMinimum { min: 3, got: 1, .. })
    ));

    let err = engine
        .define_simple(TopologyKind::Linear, &names(&["VM1", "VM42"]))
        .unwrap_err();
    assert!(matches!(err, TopologyError::Validation(ValidationError::UnknownVm(vm)) if vm == "VM42"));

    let err = engine.define_simple(TopologyKind::Bus, &[]).unwrap_err();
    assert!(matches!(err, TopologyError::Validation(ValidationError::EmptySubset)));

    assert_eq!(engine.vlans().issued(), 0);
    assert_eq!(engine.taps().bound_count(), 0);
    assert!(engine.groups().is_empty());
    assert!(connector.calls().is_empty());
}

#[test]
fn test_interconnect_requires_grouped_vms() {
    let connector = RecordingConnector::default();
    let mut engine = engine(&connector);
    engine.define_simple(TopologyKind::Linear, &names(&["VM1", "VM2"])).unwrap();
    let calls_before = connector.calls().len();

    let err = engine.interconnect("VM1", "VM3", false).unwrap_err();
    assert!(matches!(err, TopologyError::StateConflict(StateConflictError::Ungrouped(vm)) if vm == "VM3"));

    let err = engine.interconnect("VM1", "VM99", false).unwrap_err();
    assert!(matches!(err, TopologyError::StateConflict(StateConflictError::UnknownVm(_))));

    let err = engine.interconnect("VM1", "VM1", true).unwrap_err();
    assert!(matches!(err, TopologyError::Validation(ValidationError::SelfLink(_))));

    assert_eq!(engine.vlans().peek(), Some(101));
    assert_eq!(engine.taps().bound_count(), 2);
    assert_eq!(connector.calls().len(), calls_before);
}

#[test]
fn test_interconnect_between_groups() {
    let connector = RecordingConnector::default();
    let mut engine = engine(&connector);
    engine.define_simple(TopologyKind::Linear, &names(&["VM1", "VM2"])).unwrap();
    engine
        .define_simple(TopologyKind::Ring, &names(&["VM3", "VM4", "VM5"]))
        .unwrap();

    let outcome = engine.interconnect("VM2", "VM3", false).unwrap();
    assert!(outcome.recorded);
    assert_eq!(outcome.interconnection.vlan, 104);
    assert_eq!(outcome.interconnection.a.tap, "br-int-VM2-tap3");
    assert_eq!(outcome.interconnection.b.tap, "br-int-VM3-tap4");
    assert_eq!(engine.interconnections().len(), 1);
}

#[test]
fn test_same_group_needs_confirmation() {
    let connector = RecordingConnector::default();
    let mut engine = engine(&connector);
    engine
        .define_simple(TopologyKind::Ring, &names(&["VM1", "VM2", "VM3"]))
        .unwrap();

    let err = engine.interconnect("VM1", "VM2", false).unwrap_err();
    assert!(matches!(
        err,
        TopologyError::StateConflict(StateConflictError::SameGroup { group: 1, .. })
    ));
    assert_eq!(engine.vlans().peek(), Some(103));

    let outcome = engine.interconnect("VM1", "VM2", true).unwrap();
    assert!(outcome.recorded);
    assert_eq!(outcome.interconnection.vlan, 103);
    assert_eq!(outcome.interconnection.a.slot, 4);
}

#[test]
fn test_failed_interconnect_is_not_recorded() {
    let connector = RecordingConnector::failing("br-int-VM3-tap3");
    let mut engine = engine(&connector);
    engine.define_simple(TopologyKind::Linear, &names(&["VM1", "VM2"])).unwrap();
    engine.define_simple(TopologyKind::Linear, &names(&["VM3", "VM4"])).unwrap();

    let outcome = engine.interconnect("VM2", "VM3", false).unwrap();
    assert!(!outcome.recorded);
    assert!(!outcome.report.links[0].ok);
    assert_eq!(outcome.report.failure_count(), 1);
    assert!(engine.interconnections().is_empty());

    // The id and the taps stay consumed
    assert_eq!(engine.vlans().peek(), Some(103));
    assert_eq!(engine.taps().slots("VM3"), vec![2, 3]);
}

#[test]
fn test_remote_failures_are_reported_and_ids_stay_monotonic() {
    let connector = RecordingConnector::failing("br-int-VM2-tap2");
    let mut engine = engine(&connector);

    let first = engine
        .define_simple(TopologyKind::Linear, &names(&["VM1", "VM2", "VM3"]))
        .unwrap();
    assert!(!first.report.is_success());
    assert!(!first.report.links[0].ok);
    assert!(first.report.links[1].ok);
    assert_eq!(engine.groups().len(), 1);

    let second = engine.define_simple(TopologyKind::Linear, &names(&["VM4", "VM5"])).unwrap();
    assert_eq!(second.group.first_vlan, 102);
}

#[test]
fn test_unreachable_worker_skips_tagging() {
    let connector = RecordingConnector::unreachable("worker2");
    let mut engine = engine(&connector);

    let outcome = engine.define_simple(TopologyKind::Linear, &names(&["VM1", "VM2"])).unwrap();
    let vm2_steps: Vec<_> = outcome.report.steps.iter().filter(|s| s.vm == "VM2").collect();
    assert_eq!(vm2_steps.len(), 3);
    assert!(matches!(vm2_steps[0].outcome, StepOutcome::Failed(RemoteError::Connect { .. })));
    assert_eq!(vm2_steps[1].outcome, StepOutcome::Skipped);
    assert_eq!(vm2_steps[2].outcome, StepOutcome::Skipped);
    assert!(outcome.report.steps.iter().filter(|s| s.vm == "VM1").all(|s| s.is_done()));
    assert!(connector.calls().iter().all(|c| c.starts_with("worker1")));
}

#[test]
fn test_composite_continues_after_failures() {
    let connector = RecordingConnector::unreachable("worker2");
    let mut engine = engine(&connector);

    let request: CompositeRequest = "VM1,VM3:linear ; VM2,VM4:linear ; VM5-VM7:bus".parse().unwrap();
    let outcome = engine.define_composite(&request).unwrap();

    assert_eq!(outcome.groups.len(), 3);
    assert!(outcome.groups[0].report.is_success());
    assert!(!outcome.groups[1].report.is_success());
    assert!(outcome.groups[2].report.tap_ensures().any(|s| s.is_failure()));
    assert_eq!(outcome.groups[2].group.first_vlan, 102);
    assert_eq!(outcome.overlay.len(), 2);
    assert_eq!(engine.groups().len(), 3);

    let merged = outcome.report();
    assert_eq!(merged.links.len(), 2);
    assert_eq!(merged.tap_ensures().count(), 7);
}

#[test]
fn test_composite_validates_every_group_first() {
    let connector = RecordingConnector::default();
    let mut engine = engine(&connector);

    let request = CompositeRequest {
        groups: vec![
            GroupRequest::new(TopologyKind::Linear, names(&["VM1", "VM2"])),
            GroupRequest::new(TopologyKind::Ring, names(&["VM3", "VM4"])),
        ],
    };
    let err = engine.define_composite(&request).unwrap_err();
    assert!(matches!(
        err,
        TopologyError::Validation(ValidationError::BelowMinimum {
            kind: TopologyKind::Ring,
            ..
        })
    ));
    assert!(engine.groups().is_empty());
    assert_eq!(engine.vlans().issued(), 0);
    assert!(connector.calls().is_empty());
}

#[test]
fn test_taps_unique_across_groups_and_interconnects() {
    let connector = RecordingConnector::default();
    let mut engine = engine(&connector);

    let request: CompositeRequest = "VM1-VM4:ring ; VM1-VM7:tree ; VM2,VM5,VM8:bus".parse().unwrap();
    engine.define_composite(&request).unwrap();
    engine.interconnect("VM8", "VM9", false).unwrap_err();
    engine.interconnect("VM4", "VM8", false).unwrap();

    let mut seen = HashSet::new();
    for group in engine.groups() {
        for endpoint in group.endpoints() {
            assert!(seen.insert(endpoint.tap.clone()), "tap {} bound twice", endpoint.tap);
            assert!(endpoint.slot >= 2);
        }
    }
    for link in engine.interconnections() {
        for endpoint in [&link.a, &link.b] {
            assert!(seen.insert(endpoint.tap.clone()), "tap {} bound twice", endpoint.tap);
        }
    }
    assert_eq!(seen.len(), engine.taps().bound_count());
}

#[test]
fn test_vlan_exhaustion_is_checked_up_front() {
    let connector = RecordingConnector::default();
    let options = EngineOptions {
        vlan_start: 4093,
        ..EngineOptions::default()
    };
    let mut engine = TopologyEngine::new(inventory(), &connector, options);

    let err = engine
        .define_simple(TopologyKind::Linear, &names(&["VM1", "VM2", "VM3", "VM4"]))
        .unwrap_err();
    assert!(matches!(err, TopologyError::Exhausted(_)));
    assert_eq!(engine.vlans().issued(), 0);
    assert_eq!(engine.taps().bound_count(), 0);

    engine
        .define_simple(TopologyKind::Linear, &names(&["VM1", "VM2", "VM3"]))
        .unwrap();
    assert_eq!(engine.vlans().peek(), None);
}

#[test]
fn test_reset_rewinds_allocators() {
    let connector = RecordingConnector::default();
    let mut engine = engine(&connector);
    engine
        .define_simple(TopologyKind::Ring, &names(&["VM1", "VM2", "VM3"]))
        .unwrap();
    engine.interconnect("VM1", "VM2", true).unwrap();

    let report = engine.reset();
    assert!(report.is_success());
    assert_eq!(report.steps.len(), 16);
    assert!(engine.groups().is_empty());
    assert!(engine.interconnections().is_empty());
    assert_eq!(engine.vlans().peek(), Some(100));
    assert_eq!(engine.taps().bound_count(), 0);

    let outcome = engine.define_simple(TopologyKind::Linear, &names(&["VM1", "VM2"])).unwrap();
    assert_eq!(outcome.group.id, 1);
    assert_eq!(outcome.group.links[0].vlan, 100);
    assert_eq!(outcome.group.links[0].a.slot, 2);
}

#[test]
fn test_reset_leaves_no_stale_tags() {
    let connector = RecordingConnector::failing("br-int-VM3-tap3");
    let mut engine = engine(&connector);
    engine.define_simple(TopologyKind::Linear, &names(&["VM1", "VM2"])).unwrap();
    engine.define_simple(TopologyKind::Linear, &names(&["VM3", "VM4"])).unwrap();
    // VM2's side is tagged even though the link is not recorded
    assert!(!engine.interconnect("VM2", "VM3", false).unwrap().recorded);
    assert_eq!(connector.tags().get("br-int-VM2-tap3"), Some(&102));

    let report = engine.reset();
    assert!(report.is_success());
    assert_eq!(report.steps.len(), 12);
    assert!(connector.tags().is_empty());
    assert!(connector.calls().contains(&"worker2 remove br-int-VM2-tap3".to_string()));

    engine.define_simple(TopologyKind::Linear, &names(&["VM5", "VM6"])).unwrap();
    assert_eq!(
        connector.tags(),
        BTreeMap::from([
            ("br-int-VM5-tap2".to_string(), 100),
            ("br-int-VM6-tap2".to_string(), 100),
        ])
    );
}

#[test]
fn test_stuck_tap_keeps_its_vlan_and_slot_after_reset() {
    let connector = RecordingConnector::stuck("br-int-VM2-tap2");
    let mut engine = engine(&connector);
    engine.define_simple(TopologyKind::Linear, &names(&["VM1", "VM2"])).unwrap();

    let report = engine.reset();
    assert_eq!(report.failure_count(), 1);
    assert!(engine.groups().is_empty());
    assert_eq!(engine.vlans().peek(), Some(101));
    assert_eq!(engine.taps().slots("VM2"), vec![2]);
    assert!(engine.taps().slots("VM1").is_empty());

    let outcome = engine.define_simple(TopologyKind::Linear, &names(&["VM1", "VM2"])).unwrap();
    assert_eq!(outcome.group.links[0].vlan, 101);
    assert_eq!(outcome.group.links[0].a.tap, "br-int-VM1-tap2");
    assert_eq!(outcome.group.links[0].b.tap, "br-int-VM2-tap3");

    // The next reset tries the stuck tap again
    let again = engine.reset();
    assert_eq!(again.steps.len(), 6);
    let removals = connector
        .calls()
        .iter()
        .filter(|c| c.as_str() == "worker2 remove br-int-VM2-tap2")
        .count();
    assert_eq!(removals, 2);
}

#[test]
fn test_removed_vm_is_torn_down_but_stays_recorded() {
    let connector = RecordingConnector::default();
    let mut engine = engine(&connector);
    engine.define_simple(TopologyKind::Linear, &names(&["VM1", "VM2"])).unwrap();

    let report = engine.remove_vm("VM2").unwrap();
    assert!(report.is_success());
    assert_eq!(report.steps.len(), 2);
    assert!(engine.remove_vm("VM2").is_none());
    assert!(engine.groups()[0].contains("VM2"));
    assert_eq!(engine.taps().slots("VM2"), vec![2]);
    assert_eq!(
        connector.tags(),
        BTreeMap::from([("br-int-VM1-tap2".to_string(), 100)])
    );

    let err = engine.define_simple(TopologyKind::Linear, &names(&["VM2", "VM3"])).unwrap_err();
    assert!(matches!(err, TopologyError::Validation(ValidationError::UnknownVm(_))));

    // Only VM1 is left to tear down
    assert_eq!(engine.reset().steps.len(), 2);
    assert!(connector.tags().is_empty());
}

#[test]
fn test_tap_names_fit_for_two_digit_vms() {
    let connector = RecordingConnector::default();
    let mut engine = TopologyEngine::new(inventory_of(12), &connector, EngineOptions::default());

    let request: CompositeRequest = "VM9,VM10,VM11,VM12:ring ; VM10,VM12:linear".parse().unwrap();
    engine.define_composite(&request).unwrap();
    let taps: Vec<String> = engine
        .groups()
        .iter()
        .flat_map(|g| g.endpoints().into_iter().map(|e| e.tap.clone()).collect::<Vec<_>>())
        .collect();
    assert_eq!(taps.len(), 10);
    assert!(taps.iter().all(|tap| tap.len() <= MAX_IFNAME_LEN), "{:?}", taps);
    assert!(taps.contains(&"VM10-tap2".to_string()));
    assert!(taps.contains(&"br-int-VM9-tap2".to_string()));
}

#[test]
fn test_overlong_tap_name_is_rejected_before_allocation() {
    let connector = RecordingConnector::default();
    let mut engine = engine(&connector);
    // br-int-VM1-tap9 is the last name that fits
    for _ in 2..=9 {
        engine.define_simple(TopologyKind::Linear, &names(&["VM1", "VM2"])).unwrap();
    }
    let calls_before = connector.calls().len();

    let err = engine.define_simple(TopologyKind::Linear, &names(&["VM1", "VM2"])).unwrap_err();
    assert!(matches!(
        &err,
        TopologyError::Validation(ValidationError::TapNameTooLong { tap, max: 15 }) if tap == "br-int-VM1-tap10"
    ));
    let err = engine.interconnect("VM1", "VM2", true).unwrap_err();
    assert!(matches!(err, TopologyError::Validation(ValidationError::TapNameTooLong { .. })));

    assert_eq!(engine.vlans().issued(), 8);
    assert_eq!(engine.taps().bound_count(), 16);
    assert_eq!(connector.calls().len(), calls_before);
}

#[test]
fn test_preview_does_not_allocate() {
    let connector = RecordingConnector::default();
    let engine = engine(&connector);

    let request: CompositeRequest = "VM1-VM3:ring ; VM4,VM5:linear".parse().unwrap();
    let plans = engine.preview(&request).unwrap();
    assert_eq!(plans.len(), 2);
    assert_eq!(plans[0].vlan_count(), 3);
    assert_eq!(plans[1].edges, vec![Edge::new("VM4", "VM5")]);
    assert_eq!(engine.vlans().peek(), Some(100));
    assert!(connector.calls().is_empty());
}

#[test]
fn test_graph_of_recorded_state() {
    let connector = RecordingConnector::default();
    let mut engine = engine(&connector);
    engine.define_simple(TopologyKind::Linear, &names(&["VM1", "VM2"])).unwrap();
    engine.define_simple(TopologyKind::Bus, &names(&["VM3", "VM4"])).unwrap();
    engine.interconnect("VM2", "VM3", false).unwrap();

    let graph = engine.graph();
    assert_eq!(graph.nodes.len(), 4);
    assert_eq!(graph.hubs.len(), 1);
    assert_eq!(graph.edges.len(), 4);
}

#[test]
fn test_shell_session() {
    let connector = RecordingConnector::default();
    let mut session = Session::new(engine(&connector));

    let script = "\
define linear VM2,VM1
composite VM3-VM5:ring
interconnect VM1 VM3
define ring VM6
frobnicate VM1
groups
quit
define bus VM7,VM8
";
    let mut out = Vec::new();
    session.run(script.as_bytes(), &mut out).unwrap();
    let output = String::from_utf8(out).unwrap();

    assert!(output.contains("Group 1 (linear) over VM1,VM2"));
    assert!(output.contains("Interconnection VM1 <-> VM3 on VLAN 104 recorded"));
    assert!(output.contains("Error: ring topology requires at least 3 VMs, got 1"));
    assert!(output.contains("Error: Invalid input 'frobnicate VM1': unknown command 'frobnicate'"));
    assert_eq!(session.engine().groups().len(), 2);
    assert_eq!(session.runs().len(), 3);
    assert_eq!(session.error_count(), 2);

    let report = session.report();
    assert_eq!(report.next_vlan, Some(105));
    assert_eq!(report.interconnections.len(), 1);
}

#[test]
fn test_shell_reset_is_recorded() {
    let connector = RecordingConnector::default();
    let mut session = Session::new(engine(&connector));

    let script = "define linear VM1,VM2\nremove VM2\nremove VM2\nreset\n";
    let mut out = Vec::new();
    session.run(script.as_bytes(), &mut out).unwrap();
    let output = String::from_utf8(out).unwrap();

    assert!(output.contains("Removed VM2"));
    assert!(output.contains("Error: VM VM2 is not in the inventory"));
    assert!(output.contains("Engine reset"));
    let requests: Vec<&str> = session.runs().iter().map(|r| r.request.as_str()).collect();
    assert_eq!(requests, vec!["VM1,VM2:linear", "remove VM2", "reset"]);
    assert_eq!(session.error_count(), 1);
    assert!(connector.tags().is_empty());
}
