//! End-to-end builds from a flow tree to a labeled fitting network.

use pf_core::Pt3;
use pf_fittings::{
    Body, BuildOptions, FittingError, FittingTree, FittingTreeRouting, build, check_labeling,
    from_json, to_dot, to_json,
};
use pf_flow::FlowTree;

fn count_kind(tree: &FittingTree, pred: impl Fn(&Body) -> bool) -> usize {
    tree.iter().filter(|c| pred(&c.body)).count()
}

#[test]
fn straight_run_between_two_terminals() {
    // leaf at (2,0,0) draining to the outlet at the origin
    let mut flow = FlowTree::new();
    let out = flow.add_outlet(Pt3::origin(), 101_325.0).unwrap();
    let leaf = flow.add_inlet(Pt3::new(2.0, 0.0, 0.0), 1.0);
    flow.connect(leaf, out, 0.05).unwrap();

    let routing = FittingTreeRouting::default();
    let (tree, report) = build(&mut flow, &routing, &BuildOptions::default()).unwrap();

    assert!(report.is_clean());
    assert_eq!(tree.len(), 3);
    assert_eq!(count_kind(&tree, |b| matches!(b, Body::Terminal(_))), 2);
    assert_eq!(count_kind(&tree, |b| matches!(b, Body::Straight(_))), 1);

    // one section, outlet terminal first
    let ordered = tree.components_of_section("0");
    assert_eq!(ordered.len(), 3);
    let first = tree.component(ordered[0]).unwrap();
    assert!(first.is_terminal());
    assert!(first.trunk.is_none());
    assert!(check_labeling(&tree).is_empty());
    tree.check_links().unwrap();
}

#[test]
fn right_angle_bend_becomes_an_elbow() {
    let mut flow = FlowTree::new();
    let out = flow.add_outlet(Pt3::origin(), 0.0).unwrap();
    let corner = flow.add_internal(Pt3::new(2.0, 0.0, 0.0));
    let leaf = flow.add_inlet(Pt3::new(2.0, 2.0, 0.0), 1.0);
    flow.connect(leaf, corner, 0.05).unwrap();
    flow.connect(corner, out, 0.05).unwrap();

    let routing = FittingTreeRouting::default();
    let (tree, report) = build(&mut flow, &routing, &BuildOptions::default()).unwrap();

    assert!(report.is_clean());
    assert_eq!(count_kind(&tree, |b| matches!(b, Body::Elbow(_))), 1);
    assert_eq!(count_kind(&tree, |b| matches!(b, Body::Straight(_))), 2);
    // a bend does not open a new section
    assert_eq!(tree.components_of_section("0").len(), 5);
    tree.check_links().unwrap();
}

#[test]
fn junction_becomes_a_wye_with_three_sections() {
    let mut flow = FlowTree::new();
    let out = flow.add_outlet(Pt3::origin(), 0.0).unwrap();
    let junction = flow.add_internal(Pt3::new(2.0, 0.0, 0.0));
    let main = flow.add_inlet(Pt3::new(4.0, 0.0, 0.0), 1.0);
    let side = flow.add_inlet(Pt3::new(2.0, 3.0, 0.0), 0.5);
    flow.connect(main, junction, 0.05).unwrap();
    flow.connect(side, junction, 0.05).unwrap();
    flow.connect(junction, out, 0.05).unwrap();

    let routing = FittingTreeRouting::default();
    let (tree, report) = build(&mut flow, &routing, &BuildOptions::default()).unwrap();

    assert!(report.is_clean());
    assert_eq!(count_kind(&tree, |b| matches!(b, Body::Wye(_))), 1);
    assert_eq!(count_kind(&tree, |b| matches!(b, Body::Terminal(_))), 3);
    assert_eq!(count_kind(&tree, |b| matches!(b, Body::Straight(_))), 3);

    // the wye sits at the end of the trunk section
    for key in ["0", "0,0", "0,1"] {
        assert!(
            !tree.components_of_section(key).is_empty(),
            "section {key} is empty"
        );
    }
    assert!(check_labeling(&tree).is_empty());
}

#[test]
fn unroutable_branch_angle_is_reported_not_fatal() {
    // the side branch comes in at 60 degrees, outside the allowed set
    let mut flow = FlowTree::new();
    let out = flow.add_outlet(Pt3::origin(), 0.0).unwrap();
    let junction = flow.add_internal(Pt3::new(2.0, 0.0, 0.0));
    let main = flow.add_inlet(Pt3::new(4.0, 0.0, 0.0), 1.0);
    let side = flow.add_inlet(Pt3::new(3.0, 1.732, 0.0), 0.5);
    flow.connect(main, junction, 0.05).unwrap();
    flow.connect(side, junction, 0.05).unwrap();
    flow.connect(junction, out, 0.05).unwrap();

    let routing = FittingTreeRouting::default();
    let (_, report) = build(&mut flow, &routing, &BuildOptions::default()).unwrap();
    assert!(!report.is_clean());
    assert_eq!(report.connection_failures.len(), 1);

    // strict mode turns the same report entry into an error
    let strict = BuildOptions {
        strict: true,
        ..BuildOptions::default()
    };
    let err = build(&mut flow, &routing, &strict).unwrap_err();
    assert!(matches!(err, FittingError::UnsupportedBranchAngle { .. }));
}

#[test]
fn ring_network_closes_the_loop() {
    // outlet <- a <- b <- c <- leaf, closed by the loop a -> d -> c
    let mut flow = FlowTree::new();
    let out = flow.add_outlet(Pt3::origin(), 0.0).unwrap();
    let a = flow.add_internal(Pt3::new(2.0, 0.0, 0.0));
    let b = flow.add_internal(Pt3::new(4.0, 0.0, 0.0));
    let c = flow.add_internal(Pt3::new(4.0, 2.0, 0.0));
    let d = flow.add_internal(Pt3::new(2.0, 2.0, 0.0));
    let leaf = flow.add_inlet(Pt3::new(4.0, 4.0, 0.0), 1.0);
    flow.connect(a, out, 0.05).unwrap();
    flow.connect(b, a, 0.05).unwrap();
    flow.connect(c, b, 0.05).unwrap();
    flow.connect(leaf, c, 0.05).unwrap();
    flow.connect_loop(d, a, 0.05).unwrap();
    flow.connect_loop(c, d, 0.05).unwrap();

    let routing = FittingTreeRouting::default();
    let (tree, report) = build(&mut flow, &routing, &BuildOptions::default()).unwrap();

    assert!(report.is_clean(), "{report:?}");
    assert_eq!(count_kind(&tree, |b| matches!(b, Body::Terminal(_))), 2);
    assert_eq!(count_kind(&tree, |b| matches!(b, Body::Wye(_))), 2);
    assert_eq!(count_kind(&tree, |b| matches!(b, Body::Elbow(_))), 2);
    assert_eq!(count_kind(&tree, |b| matches!(b, Body::Straight(_))), 6);
    tree.check_links().unwrap();
}

#[test]
fn export_survives_a_round_trip() {
    let mut flow = FlowTree::new();
    let out = flow.add_outlet(Pt3::origin(), 0.0).unwrap();
    let junction = flow.add_internal(Pt3::new(2.0, 0.0, 0.0));
    let main = flow.add_inlet(Pt3::new(4.0, 0.0, 0.0), 1.0);
    let side = flow.add_inlet(Pt3::new(2.0, 3.0, 0.0), 0.5);
    flow.connect(main, junction, 0.05).unwrap();
    flow.connect(side, junction, 0.05).unwrap();
    flow.connect(junction, out, 0.05).unwrap();

    let routing = FittingTreeRouting::default();
    let (tree, _) = build(&mut flow, &routing, &BuildOptions::default()).unwrap();

    let dot = to_dot(&tree);
    for c in tree.iter() {
        assert!(dot.contains(&c.name), "{} missing from dot output", c.name);
    }

    let loaded = from_json(&to_json(&tree).unwrap()).unwrap();
    assert_eq!(loaded.len(), tree.len());
    assert_eq!(
        loaded.components_of_section("0,1"),
        tree.components_of_section("0,1")
    );
    loaded.check_links().unwrap();
}
