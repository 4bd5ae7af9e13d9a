//! End-to-end pipeline scenarios: stanza text through the builder into the
//! store, observing the change bus the way an SSE subscriber would.

use chrono::{DateTime, TimeZone, Utc};
use sparkalerts::builder::{Builder, Disposition};
use sparkalerts::bus::{Bus, EventKind};
use sparkalerts::geometry::CountyGeometry;
use sparkalerts::message::Stanza;
use sparkalerts::store::Store;
use sparkalerts::Config;
use std::sync::Arc;

struct Harness {
    _dir: tempfile::TempDir,
    store: Arc<Store>,
    builder: Builder,
    county: CountyGeometry,
}

impl Harness {
    fn new(allowed: &[&str]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.allowed_alerts = allowed.iter().map(|s| s.to_string()).collect();

        Self {
            store: Arc::new(Store::open(&dir.path().join("alerts.json"), Bus::new(64))),
            builder: Builder::new(&config),
            county: CountyGeometry::empty(),
            _dir: dir,
        }
    }

    fn stanza(&self, body: &str) -> Stanza {
        Stanza {
            ttaaii: Some("WFUS54".into()),
            cccc: Some("KSGX".into()),
            awips_id: Some("TORSGX".into()),
            issue: None,
            id: Some("14425.1".into()),
            delay_stamp: None,
            ldm_sequence_number: None,
            body: body.to_string(),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 13, 3, 41, 0).unwrap()
    }

    /// Build the stanza and apply the disposition the way the ingest loop
    /// does.
    async fn ingest(&self, body: &str) {
        let stanza = self.stanza(body);
        match self
            .builder
            .build(&stanza, &self.county, None, self.now())
            .await
        {
            Disposition::Upsert { records, update } => {
                self.store.upsert(records, update).await.unwrap()
            }
            Disposition::Cancel { key } => {
                self.store.delete_by_vtec_key(&key).await.unwrap();
            }
            Disposition::Discard => {}
        }
    }
}

const TORNADO_WARNING: &str = "BULLETIN - EAS ACTIVATION REQUESTED\nTornado Warning\nNational Weather Service San Diego CA\n1038 PM PST Thu Feb 12 2026\n\nCAC073-130415-\n/O.NEW.KSGX.TO.W.0002.260213T0340Z-260213T0415Z/\n\nThe National Weather Service in San Diego has issued a Tornado Warning.\n\n* WHAT...Tornado.\n\n* WHERE...Northern San Diego County.\n\nLAT...LON 3458 11702 3460 11704 3462 11702\n\n$$";

#[tokio::test]
async fn scenario_fresh_tornado_warning() {
    let h = Harness::new(&[]);
    let mut rx = h.store.bus().subscribe();

    h.ingest(TORNADO_WARNING).await;

    let snapshot = h.store.snapshot().await;
    assert_eq!(snapshot.len(), 1);

    let r = &snapshot[0];
    assert_eq!(r.id, "KSGX.TO.W.0002");
    assert_eq!(r.issued.to_rfc3339(), "2026-02-13T03:40:00+00:00");
    assert_eq!(r.expiry.unwrap().to_rfc3339(), "2026-02-13T04:15:00+00:00");
    assert!(r.issued <= r.expiry.unwrap());
    assert_eq!(r.geometry.len(), 1);
    assert_eq!(r.geometry[0].len(), 4);
    assert_eq!(r.geometry[0].first(), r.geometry[0].last());
    assert_eq!(r.alert_info["WHAT"], "Tornado.");

    let event = rx.try_recv().unwrap();
    assert_eq!(event.kind, EventKind::New);
    assert_eq!(event.data["id"], "KSGX.TO.W.0002");
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn scenario_cancellation_removes_record() {
    let h = Harness::new(&[]);
    h.ingest(TORNADO_WARNING).await;
    assert_eq!(h.store.len().await, 1);

    let mut rx = h.store.bus().subscribe();
    h.ingest("BULLETIN - EAS ACTIVATION REQUESTED\nTornado Warning\nNational Weather Service San Diego CA\n\nCAC073-130430-\n/O.CAN.KSGX.TO.W.0002.260213T0340Z-260213T0415Z/\n\nThe tornado warning has been cancelled.\n\n$$").await;

    assert_eq!(h.store.len().await, 0);
    let event = rx.try_recv().unwrap();
    assert_eq!(event.kind, EventKind::Update);
    assert_eq!(event.data["id"], "KSGX.TO.W.0002");
}

#[tokio::test]
async fn scenario_cancellation_leaves_other_records() {
    let h = Harness::new(&[]);
    h.ingest(TORNADO_WARNING).await;
    h.ingest("BULLETIN - EAS ACTIVATION REQUESTED\nTornado Warning\nNational Weather Service Denver CO\n\nCOC031-130430-\n/O.NEW.KBOU.TO.W.0007.260213T0340Z-260213T0430Z/\n\nAnother tornado warning.\n\nLAT...LON 3970 10498 3972 10500 3974 10498\n\n$$").await;
    assert_eq!(h.store.len().await, 2);

    h.ingest("BULLETIN - EAS ACTIVATION REQUESTED\n\n/O.CAN.KSGX.TO.W.0002.260213T0340Z-260213T0415Z/\n\ncancelled.\n$$").await;

    let snapshot = h.store.snapshot().await;
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].id, "KBOU.TO.W.0007");
}

#[tokio::test]
async fn scenario_split_message() {
    let h = Harness::new(&[]);
    let mut rx = h.store.bus().subscribe();

    h.ingest("BULLETIN - SEVERE WEATHER MESSAGE\nSevere Thunderstorm Warning\nNational Weather Service San Diego CA\n\nCAC073-130415-\n/O.NEW.KSGX.SV.W.0011.260213T0340Z-260213T0415Z/\n\nFirst cell approaching the valley.\n\nLAT...LON 3458 11702 3460 11704 3462 11702\n\n&&\n\nSecond cell over the mountains.\n\nLAT...LON 3358 11602 3360 11604 3362 11602\n\n$$").await;

    let snapshot = h.store.snapshot().await;
    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot[0].id, "KSGX.SV.W.0011_0");
    assert_eq!(snapshot[1].id, "KSGX.SV.W.0011_1");
    assert_ne!(snapshot[0].geometry, snapshot[1].geometry);

    assert_eq!(rx.try_recv().unwrap().kind, EventKind::New);
    assert_eq!(rx.try_recv().unwrap().kind, EventKind::New);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn scenario_non_vtec_special_weather_statement() {
    let h = Harness::new(&["Special Weather Statement"]);

    h.ingest(r#"<?xml version="1.0"?><alert xmlns="urn:oasis:names:tc:emergency:cap:1.2"><identifier>NWS-SPS-12345</identifier><sender>w-nws.webmaster@noaa.gov</sender><sent>2026-02-13T03:41:00-00:00</sent><info><event>Special Weather Statement</event><senderName>NWS San Diego CA</senderName><expires>2026-02-13T04:41:00-00:00</expires><description>A strong thunderstorm will impact the area. Gusty winds are likely.</description><instruction>Seek shelter indoors.</instruction><parameter><valueName>NWSheadline</valueName><value>NWSheadline STRONG STORMS EXPECTED THROUGH 9 PM</value></parameter><area><areaDesc>Northern San Diego County</areaDesc><polygon>34.58,-117.02 34.60,-117.04 34.62,-117.02 34.58,-117.02</polygon><geocode><valueName>UGC</valueName><value>CAZ043</value></geocode></area></info></alert>"#).await;

    let snapshot = h.store.snapshot().await;
    assert_eq!(snapshot.len(), 1, "exactly one record, splitter suppressed");

    let r = &snapshot[0];
    assert_eq!(r.id, "NWS-SPS-12345");
    assert_eq!(r.name, "Special Weather Statement");
    assert_eq!(
        r.headline.as_deref(),
        Some("STRONG STORMS EXPECTED THROUGH 9 PM"),
        "literal NWSheadline prefix stripped"
    );
    assert_eq!(r.issued.to_rfc3339(), "2026-02-13T03:41:00+00:00");
    assert_eq!(r.expiry.unwrap().to_rfc3339(), "2026-02-13T04:41:00+00:00");
    assert_eq!(r.ugc, vec!["CAZ043"]);
}

#[tokio::test]
async fn scenario_duplicate_cap_and_vtec_rejected() {
    let h = Harness::new(&[]);
    h.ingest(TORNADO_WARNING).await;
    let before = h.store.snapshot().await;

    h.ingest(r#"URGENT - WEATHER MESSAGE
/O.NEW.KSGX.SV.W.0011.260213T0340Z-260213T0415Z/

Legacy text of the warning.

<?xml version="1.0"?><alert xmlns="urn:oasis:names:tc:emergency:cap:1.2"><identifier>NWS-SVW-99</identifier><sent>2026-02-13T03:40:00-00:00</sent><info><event>Severe Thunderstorm Warning</event><parameter><valueName>VTEC</valueName><value>/O.NEW.KSGX.SV.W.0011.260213T0340Z-260213T0415Z/</value></parameter></info></alert>"#).await;

    assert_eq!(h.store.snapshot().await, before, "snapshot unchanged");
}

#[tokio::test]
async fn scenario_expiry_sweep() {
    let h = Harness::new(&[]);

    // one alert a minute past expiry, one an hour out
    h.ingest(TORNADO_WARNING).await;
    h.ingest("BULLETIN - EAS ACTIVATION REQUESTED\nTornado Warning\nNational Weather Service Denver CO\n\nCOC031-130530-\n/O.NEW.KBOU.TO.W.0007.260213T0340Z-260213T0516Z/\n\nlong lived storm.\n\nLAT...LON 3970 10498 3972 10500 3974 10498\n\n$$").await;
    assert_eq!(h.store.len().await, 2);

    let mut rx = h.store.bus().subscribe();
    let sweep_at = Utc.with_ymd_and_hms(2026, 2, 13, 4, 16, 0).unwrap();
    let removed = h.store.sweep_expired(sweep_at).await.unwrap();

    assert_eq!(removed, vec!["KSGX.TO.W.0002"]);
    let snapshot = h.store.snapshot().await;
    assert_eq!(snapshot.len(), 1);
    assert!(snapshot.iter().all(|a| a.expiry.unwrap() >= sweep_at));

    let event = rx.try_recv().unwrap();
    assert_eq!(event.kind, EventKind::Update);
    assert!(rx.try_recv().is_err(), "one bulk event only");
}

#[tokio::test]
async fn ids_stay_distinct_across_reingest() {
    let h = Harness::new(&[]);
    h.ingest(TORNADO_WARNING).await;
    h.ingest(TORNADO_WARNING).await;

    let snapshot = h.store.snapshot().await;
    assert_eq!(snapshot.len(), 1);
    for (i, a) in snapshot.iter().enumerate() {
        for b in snapshot.iter().skip(i + 1) {
            assert_ne!(a.id, b.id);
        }
    }
}
