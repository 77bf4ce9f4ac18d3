mod util;

use bq_browser::browser::{Axis, Browser, BrowserError, BrowserOptions, Event};
use bq_browser::manifest::{Manifest, ensure_manifest};
use bq_browser::plot::{Figure, PlotFamily, PlotKind};
use proptest::prelude::*;
use std::collections::BTreeMap;
use util::{Call, FakeService, patients};

fn manifest_of(entries: &[(&str, &str, u64)]) -> Manifest {
    let mut grouped: BTreeMap<String, BTreeMap<String, u64>> = BTreeMap::new();
    for (db, table, n) in entries {
        grouped
            .entry(db.to_string())
            .or_default()
            .insert(table.to_string(), *n);
    }
    let mut m = Manifest::new();
    for (db, tables) in grouped {
        m.insert(db, tables);
    }
    m
}

fn options(page_size: u64) -> BrowserOptions {
    BrowserOptions {
        base_project: String::new(),
        databases: vec!["db1".into(), "db2".into()],
        page_size,
        redraw_plot_on_offset: false,
    }
}

fn select(browser: &mut Browser<'_>, db: &str, table: &str) {
    browser
        .dispatch(Event::SelectDatabase(Some(db.into())))
        .expect("select database");
    browser
        .dispatch(Event::SelectTable(Some(table.into())))
        .expect("select table");
}

#[test]
fn new_browser_starts_with_empty_panes_and_no_calls() {
    let service = FakeService::new().with_table("db1", "t1", patients(42));
    let browser = Browser::new(&service, Manifest::new(), options(10));
    assert!(browser.table_pane().is_empty());
    assert!(browser.plot_pane().is_empty());
    assert_eq!(browser.database(), None);
    assert_eq!(browser.database_options(), ["db1".to_string(), "db2".to_string()]);
    assert!(service.calls().is_empty());
}

#[test]
fn cached_manifest_skips_enumeration_and_bounds_offset() {
    let tmp = tempfile::TempDir::new().unwrap();
    let path = tmp.path().join(".mimic_info.yaml");
    std::fs::write(&path, r#"{"db1": {"t1": 42}}"#).unwrap();

    let service = FakeService::new().with_table("db1", "t1", patients(42));
    let manifest = ensure_manifest(&service, "", &["db1".to_string()], &path, &mut std::io::sink()).unwrap();
    assert!(service.calls().is_empty(), "no enumeration with a cached manifest");

    let mut browser = Browser::new(&service, manifest, options(10));
    select(&mut browser, "db1", "t1");
    assert_eq!(browser.offset_range(), (0, 42));
    assert_eq!(browser.offset(), 0);
    assert!(service.count_calls().is_empty());
    assert_eq!(
        service.calls(),
        vec![
            Call::ListTables("db1".into()),
            Call::Fetch {
                database: "db1".into(),
                table: "t1".into(),
                limit: 10,
                offset: 0,
            },
        ]
    );
}

#[test]
fn offset_range_tracks_manifest_count_for_every_table() {
    let service = FakeService::new()
        .with_table("db1", "a", patients(3))
        .with_table("db1", "b", patients(7))
        .with_table("db2", "c", patients(0));
    let manifest = manifest_of(&[("db1", "a", 3), ("db1", "b", 7_000_000), ("db2", "c", 0)]);
    let mut browser = Browser::new(&service, manifest.clone(), options(10));
    for db in manifest.databases() {
        for (table, rows) in manifest.tables(db).unwrap() {
            select(&mut browser, db, table);
            assert_eq!(browser.offset_range(), (0, *rows), "{db}.{table}");
        }
    }
}

#[test]
fn selecting_a_table_fills_columns_and_draws_table() {
    let service = FakeService::new().with_table("db1", "patients", patients(30));
    let manifest = manifest_of(&[("db1", "patients", 30)]);
    let mut browser = Browser::new(&service, manifest, options(10));
    select(&mut browser, "db1", "patients");

    assert_eq!(
        browser.column_options(),
        ["subject_id", "gender", "anchor_age", "unit"].map(String::from)
    );
    let view = browser.table_pane().content().expect("table shown");
    assert_eq!(view.first_row, 0);
    assert_eq!(view.row_count, 10);
    assert_eq!(view.column_count, 4);
    assert!(browser.plot_pane().is_empty());
}

#[test]
fn returning_to_offset_zero_reproduces_the_first_window() {
    let service = FakeService::new().with_table("db1", "t1", patients(42));
    let mut browser = Browser::new(&service, manifest_of(&[("db1", "t1", 42)]), options(10));
    select(&mut browser, "db1", "t1");
    let first = browser.frame().cloned();
    let first_pane = browser.table_pane().clone();

    browser.dispatch(Event::SetOffset(10)).unwrap();
    assert_ne!(browser.frame().cloned(), first);
    assert_eq!(browser.table_pane().content().unwrap().first_row, 10);

    browser.dispatch(Event::SetOffset(0)).unwrap();
    assert_eq!(browser.frame().cloned(), first);
    assert_eq!(browser.table_pane(), &first_pane);
}

#[test]
fn offset_past_the_end_is_clamped() {
    let service = FakeService::new().with_table("db1", "t1", patients(42));
    let mut browser = Browser::new(&service, manifest_of(&[("db1", "t1", 42)]), options(10));
    select(&mut browser, "db1", "t1");
    browser.dispatch(Event::SetOffset(10_000)).unwrap();
    assert_eq!(browser.offset(), 42);
    let view = browser.table_pane().content().expect("header still drawn");
    assert_eq!(view.row_count, 0);
}

#[test]
fn offset_without_a_table_is_ignored() {
    let service = FakeService::new().with_table("db1", "t1", patients(5));
    let mut browser = Browser::new(&service, Manifest::new(), options(10));
    browser.dispatch(Event::SetOffset(3)).unwrap();
    assert_eq!(browser.offset(), 0);
    assert!(service.calls().is_empty());
}

#[test]
fn unset_plot_family_leaves_plot_pane_empty() {
    let service = FakeService::new().with_table("db1", "t1", patients(20));
    let mut browser = Browser::new(&service, manifest_of(&[("db1", "t1", 20)]), options(20));
    select(&mut browser, "db1", "t1");
    for event in [
        Event::SetAxis(Axis::X, Some("gender".into())),
        Event::SetAxis(Axis::Y, Some("anchor_age".into())),
        Event::SetAxis(Axis::Hue, Some("unit".into())),
        Event::SetPlotKind(PlotKind::Violin),
        Event::SetOffset(5),
    ] {
        browser.dispatch(event).unwrap();
        assert!(browser.plot_pane().is_empty());
    }
}

#[test]
fn describe_ignores_axis_selectors() {
    let service = FakeService::new().with_table("db1", "t1", patients(20));
    let mut browser = Browser::new(&service, manifest_of(&[("db1", "t1", 20)]), options(20));
    select(&mut browser, "db1", "t1");
    browser
        .dispatch(Event::SetPlotFamily(Some(PlotFamily::Describe)))
        .unwrap();
    let baseline = browser.plot_pane().clone();
    assert!(matches!(baseline.content(), Some(Figure::Summary(_))));

    browser.dispatch(Event::SetAxis(Axis::X, Some("gender".into()))).unwrap();
    browser.dispatch(Event::SetAxis(Axis::Y, Some("unit".into()))).unwrap();
    browser.dispatch(Event::SetAxis(Axis::Hue, Some("anchor_age".into()))).unwrap();
    browser.dispatch(Event::SetPlotKind(PlotKind::Boxen)).unwrap();
    assert_eq!(browser.plot_pane(), &baseline);
}

#[test]
fn render_failure_empties_plot_only_and_session_continues() {
    let service = FakeService::new().with_table("db1", "t1", patients(20));
    let mut browser = Browser::new(&service, manifest_of(&[("db1", "t1", 20)]), options(20));
    select(&mut browser, "db1", "t1");
    let table_before = browser.table_pane().clone();

    browser
        .dispatch(Event::SetPlotFamily(Some(PlotFamily::Numeric)))
        .unwrap();
    // Numeric without x cannot be drawn.
    assert!(browser.plot_pane().is_empty());
    // Text column as histogram variable cannot be drawn either.
    browser.dispatch(Event::SetAxis(Axis::X, Some("gender".into()))).unwrap();
    assert!(browser.plot_pane().is_empty());
    assert_eq!(browser.table_pane(), &table_before);

    browser
        .dispatch(Event::SetAxis(Axis::X, Some("anchor_age".into())))
        .unwrap();
    assert!(matches!(
        browser.plot_pane().content(),
        Some(Figure::Histogram(_))
    ));
}

#[test]
fn categorical_count_plot_follows_selectors() {
    let service = FakeService::new().with_table("db1", "t1", patients(20));
    let mut browser = Browser::new(&service, manifest_of(&[("db1", "t1", 20)]), options(20));
    select(&mut browser, "db1", "t1");
    browser
        .dispatch(Event::SetPlotFamily(Some(PlotFamily::Categorical)))
        .unwrap();
    assert!(browser.plot_pane().is_empty(), "count plot needs one axis");

    browser.dispatch(Event::SetAxis(Axis::X, Some("gender".into()))).unwrap();
    let Some(Figure::Categorical(fig)) = browser.plot_pane().content() else {
        panic!("expected categorical figure");
    };
    assert_eq!(fig.kind, PlotKind::Count);
    assert_eq!(fig.x_tick_rotation, 45);
    let total: usize = fig.facets[0]
        .groups
        .iter()
        .map(|g| match g.stat {
            bq_browser::plot::CategoryStat::Count(n) => n,
            _ => 0,
        })
        .sum();
    assert_eq!(total, 20);
}

#[test]
fn selecting_a_new_table_clears_axes_but_keeps_family() {
    let service = FakeService::new()
        .with_table("db1", "a", patients(10))
        .with_table("db1", "b", patients(10));
    let mut browser = Browser::new(
        &service,
        manifest_of(&[("db1", "a", 10), ("db1", "b", 10)]),
        options(10),
    );
    select(&mut browser, "db1", "a");
    browser
        .dispatch(Event::SetPlotFamily(Some(PlotFamily::Categorical)))
        .unwrap();
    browser.dispatch(Event::SetAxis(Axis::X, Some("unit".into()))).unwrap();

    browser.dispatch(Event::SelectTable(Some("b".into()))).unwrap();
    let spec = browser.plot_spec();
    assert_eq!(spec.family, Some(PlotFamily::Categorical));
    assert_eq!(spec.x, None);
    assert!(browser.plot_pane().is_empty());
}

#[test]
fn selecting_a_database_unsets_table_but_keeps_panes() {
    let service = FakeService::new()
        .with_table("db1", "t1", patients(10))
        .with_table("db2", "t2", patients(10));
    let mut browser = Browser::new(
        &service,
        manifest_of(&[("db1", "t1", 10), ("db2", "t2", 10)]),
        options(10),
    );
    select(&mut browser, "db1", "t1");
    let pane = browser.table_pane().clone();

    browser
        .dispatch(Event::SelectDatabase(Some("db2".into())))
        .unwrap();
    assert_eq!(browser.table(), None);
    assert_eq!(browser.table_options(), ["t2".to_string()]);
    assert_eq!(browser.table_pane(), &pane);

    service.reset_calls();
    browser.dispatch(Event::SelectDatabase(None)).unwrap();
    assert_eq!(browser.database(), Some("db2"));
    assert!(service.calls().is_empty());
}

#[test]
fn plot_is_only_recomputed_on_offset_when_enabled() {
    let manifest = manifest_of(&[("db1", "t1", 20)]);
    for redraw in [false, true] {
        let service = FakeService::new().with_table("db1", "t1", patients(20));
        let mut opts = options(5);
        opts.redraw_plot_on_offset = redraw;
        let mut browser = Browser::new(&service, manifest.clone(), opts);
        select(&mut browser, "db1", "t1");
        browser
            .dispatch(Event::SetPlotFamily(Some(PlotFamily::Numeric)))
            .unwrap();
        browser
            .dispatch(Event::SetAxis(Axis::X, Some("anchor_age".into())))
            .unwrap();
        let before = browser.plot_pane().clone();
        assert!(!before.is_empty());

        browser.dispatch(Event::SetOffset(5)).unwrap();
        if redraw {
            assert_ne!(browser.plot_pane(), &before);
        } else {
            assert_eq!(browser.plot_pane(), &before);
        }
    }
}

#[test]
fn query_failure_propagates_and_keeps_state() {
    let service = FakeService::new().with_table("db1", "t1", patients(30));
    let mut browser = Browser::new(&service, manifest_of(&[("db1", "t1", 30)]), options(10));
    select(&mut browser, "db1", "t1");
    let frame = browser.frame().cloned();

    *service.fail_fetches.borrow_mut() = true;
    let err = browser.dispatch(Event::SetOffset(10)).unwrap_err();
    assert!(matches!(err, BrowserError::Query(_)));
    assert_eq!(browser.offset(), 0);
    assert_eq!(browser.frame().cloned(), frame);
}

#[test]
fn invalid_selections_are_rejected() {
    let service = FakeService::new()
        .with_table("db1", "t1", patients(5))
        .with_table("db1", "uncounted", patients(5));
    let mut browser = Browser::new(&service, manifest_of(&[("db1", "t1", 5)]), options(10));

    assert!(matches!(
        browser.dispatch(Event::SelectTable(Some("t1".into()))),
        Err(BrowserError::NoDatabase)
    ));
    browser
        .dispatch(Event::SelectDatabase(Some("db1".into())))
        .unwrap();
    assert!(matches!(
        browser.dispatch(Event::SelectTable(Some("nope".into()))),
        Err(BrowserError::NotAnOption(_))
    ));
    assert!(matches!(
        browser.dispatch(Event::SelectTable(Some("uncounted".into()))),
        Err(BrowserError::UnknownTable { .. })
    ));
    browser.dispatch(Event::SelectTable(Some("t1".into()))).unwrap();
    assert!(matches!(
        browser.dispatch(Event::SetAxis(Axis::Hue, Some("missing".into()))),
        Err(BrowserError::UnknownColumn(_))
    ));
}

#[test]
fn base_project_prefixes_remote_names() {
    let service = FakeService::new().with_table("physionet-data.mimic_core", "patients", patients(5));
    let mut opts = options(10);
    opts.base_project = "physionet-data.".into();
    opts.databases = vec!["mimic_core".into()];
    let mut browser = Browser::new(&service, manifest_of(&[("mimic_core", "patients", 5)]), opts);
    select(&mut browser, "mimic_core", "patients");
    assert_eq!(browser.database(), Some("mimic_core"));
    assert!(service.calls().contains(&Call::Fetch {
        database: "physionet-data.mimic_core".into(),
        table: "patients".into(),
        limit: 10,
        offset: 0,
    }));
}

#[test]
fn unknown_database_is_rejected_without_remote_calls() {
    let service = FakeService::new()
        .with_table("db1", "t1", patients(5))
        .with_table("db3", "t3", patients(5));
    let mut browser = Browser::new(&service, manifest_of(&[("db1", "t1", 5)]), options(10));
    select(&mut browser, "db1", "t1");
    service.reset_calls();

    let err = browser
        .dispatch(Event::SelectDatabase(Some("db3".into())))
        .unwrap_err();
    assert!(matches!(&err, BrowserError::NotAnOption(db) if db == "db3"));
    assert!(service.calls().is_empty(), "no listing for an unoffered database");
    assert_eq!(browser.database(), Some("db1"));
    assert_eq!(browser.table(), Some("t1"));
    assert_eq!(browser.table_options(), ["t1".to_string()]);
}

proptest! {
    #[test]
    fn offset_always_lands_within_bounds(rows in 0u64..200, requested in 0u64..10_000) {
        let service = FakeService::new().with_table("db1", "t1", patients(rows as usize));
        let mut browser = Browser::new(&service, manifest_of(&[("db1", "t1", rows)]), options(25));
        select(&mut browser, "db1", "t1");
        browser.dispatch(Event::SetOffset(requested)).unwrap();
        let (lo, hi) = browser.offset_range();
        prop_assert!(lo <= browser.offset() && browser.offset() <= hi);
        prop_assert_eq!(browser.offset(), requested.min(rows));
    }
}
