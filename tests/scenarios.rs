use campus2career::collections::{Applications, Postings, Shortlisted};
use campus2career::models::{
    ApplicationStatus, InternshipPosting, PostingKind, PostingStatus, StudentProfile,
};
use campus2career::workflows::{self, NewPosting};
use campus2career::{Change, Collection, Hub, MemoryBackend, Origin, SqliteBackend, Store};
use chrono::{TimeZone, Utc};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn posting(id: u64, title: &str) -> InternshipPosting {
    InternshipPosting {
        id,
        title: title.into(),
        company: "Infosys".into(),
        kind: PostingKind::Universal,
        target_colleges: BTreeSet::new(),
        status: PostingStatus::Active,
        applications_count: 0,
        posted_at: Utc.with_ymd_and_hms(2025, 10, 1, 9, 0, 0).unwrap(),
        duration: Some("6 months".into()),
        stipend: Some("20000".into()),
        mode: Some("Bangalore".into()),
        description: None,
        rejection_reason: None,
    }
}

fn student() -> StudentProfile {
    StudentProfile {
        id: "asha".into(),
        name: "Asha Rao".into(),
        college: "NIT Trichy".into(),
        cgpa: Some(8.9),
    }
}

#[test]
fn round_trip_for_every_collection_without_fan_out_to_others() {
    let hub = Hub::new(Store::new(MemoryBackend::new()));
    let hits: Arc<Mutex<Vec<Collection>>> = Arc::default();
    let _subs: Vec<_> = Collection::ALL
        .iter()
        .map(|&c| {
            let hits = Arc::clone(&hits);
            hub.subscribe(c, move |change: &Change| hits.lock().unwrap().push(change.collection))
        })
        .collect();

    let value = vec![posting(42, "Backend Developer")];
    hub.save::<Postings>(&value).unwrap();

    assert_eq!(hub.load::<Postings>().unwrap(), value);
    assert_eq!(*hits.lock().unwrap(), vec![Collection::Postings]);
}

#[test]
fn unsubscribed_card_is_not_called() {
    let hub = Hub::new(Store::new(MemoryBackend::new()));
    let hits = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&hits);
    let sub = hub.subscribe(Collection::Postings, move |_| *counter.lock().unwrap() += 1);
    sub.cancel();
    hub.save::<Postings>(&[posting(1, "x")]).unwrap();
    assert_eq!(*hits.lock().unwrap(), 0);
}

#[tokio::test]
async fn industry_tab_sees_student_application_within_poll_interval() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("campus2career.db");
    // Two tabs: separate hubs, separate buses, one database file
    let student_tab = Hub::new(Store::new(SqliteBackend::open(&path).unwrap()));
    let industry_tab = Hub::new(Store::new(SqliteBackend::open(&path).unwrap()));

    student_tab.save::<Postings>(&[posting(42, "Frontend Developer")]).unwrap();

    let changes: Arc<Mutex<Vec<Change>>> = Arc::default();
    let sink = Arc::clone(&changes);
    let mount = industry_tab.mount(&[Collection::Applications], Duration::from_millis(50), move |c| {
        sink.lock().unwrap().push(*c)
    });

    let application = workflows::apply(&student_tab, &student(), 42, Utc::now()).unwrap();
    assert_eq!(application.internship_id, 42);
    assert_eq!(application.status, ApplicationStatus::Applied);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if !changes.lock().unwrap().is_empty() {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "industry tab never saw the application");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let seen = changes.lock().unwrap().clone();
    assert_eq!(seen[0], Change { collection: Collection::Applications, origin: Origin::Poll });
    let applications = industry_tab.load::<Applications>().unwrap();
    assert_eq!(applications.len(), 1);
    assert_eq!(applications[0].internship_id, 42);
    assert_eq!(applications[0].status, ApplicationStatus::Applied);

    mount.unmount().await;
}

#[test]
fn shortlisting_keeps_application_and_shortlist_in_step() {
    let hub = Hub::new(Store::new(MemoryBackend::new()));
    hub.save::<Postings>(&[posting(3, "Data Analyst")]).unwrap();

    // Pad the collection so the application under test gets id 7
    for n in 1..=6 {
        let mut other = student();
        other.id = format!("s{}", n);
        workflows::apply(&hub, &other, 3, Utc::now()).unwrap();
    }
    let target = workflows::apply(&hub, &student(), 3, Utc::now()).unwrap();
    assert_eq!(target.id, 7);

    workflows::transition_application(&hub, 7, ApplicationStatus::Shortlisted, Utc::now()).unwrap();

    let shortlisted = hub.load::<Shortlisted>().unwrap();
    assert_eq!(shortlisted.len(), 1);
    assert_eq!(shortlisted[0].id, 7);
    assert_eq!(shortlisted[0].name, "Asha Rao");

    let stored = hub.load::<Applications>().unwrap();
    let app = stored.iter().find(|a| a.id == 7).unwrap();
    assert_eq!(app.status, ApplicationStatus::Shortlisted);
    assert!(stored.iter().filter(|a| a.id != 7).all(|a| a.status == ApplicationStatus::Applied));
}

#[test]
fn interleaved_writers_are_last_write_wins() {
    let backend = MemoryBackend::new();
    let tab_a = Hub::new(Store::new(backend.clone()));
    let tab_b = Hub::new(Store::new(backend));
    tab_a.save::<Postings>(&[posting(1, "original")]).unwrap();

    // Both read before either writes
    let mut a_view = tab_a.load::<Postings>().unwrap();
    let mut b_view = tab_b.load::<Postings>().unwrap();
    a_view.push(posting(2, "from tab a"));
    b_view.push(posting(3, "from tab b"));

    tab_a.save::<Postings>(&a_view).unwrap();
    tab_b.save::<Postings>(&b_view).unwrap();

    let final_value = tab_a.load::<Postings>().unwrap();
    assert_eq!(final_value, b_view);
    assert!(!final_value.iter().any(|p| p.title == "from tab a"));
}

#[test]
fn legacy_key_is_invisible_until_migrated() {
    let store = Store::new(MemoryBackend::new());
    let hub = Hub::new(store.clone());
    store
        .set(
            "student_applied_internships",
            &json!([{
                "id": 1, "internshipId": 42, "studentId": "asha", "studentName": "Asha Rao",
                "college": "NIT Trichy", "role": "Frontend Developer", "company": "Infosys",
                "appliedDate": "2025-09-25T10:00:00Z", "status": "pending"
            }]),
        )
        .unwrap();

    assert!(hub.load::<Applications>().unwrap().is_empty());

    let report = campus2career::collections::migrate::<Applications>(&store, Utc::now()).unwrap();
    assert_eq!(report.moved, 1);

    let applications = hub.load::<Applications>().unwrap();
    assert_eq!(applications.len(), 1);
    assert_eq!(applications[0].status, ApplicationStatus::Pending);
    assert_eq!(store.get_raw("student_applied_internships").unwrap(), None);
}

#[test]
fn college_specific_flow_end_to_end() {
    let hub = Hub::new(Store::new(MemoryBackend::new()));
    let now = Utc::now();
    let posted = workflows::post_internship(
        &hub,
        NewPosting {
            title: "Cloud Engineering Intern".into(),
            company: "Tech Mahindra".into(),
            kind: PostingKind::CollegeSpecific,
            target_colleges: ["NIT Trichy".to_string()].into_iter().collect(),
            duration: None,
            stipend: None,
            mode: None,
            description: None,
        },
        now,
    )
    .unwrap();

    assert!(workflows::available_postings(&hub, "NIT Trichy").unwrap().is_empty());
    workflows::approve_posting(&hub, posted.id, now).unwrap();
    assert_eq!(workflows::available_postings(&hub, "NIT Trichy").unwrap().len(), 1);

    let application = workflows::apply(&hub, &student(), posted.id, now).unwrap();
    let mut outsider = student();
    outsider.id = "ravi".into();
    outsider.college = "IIT Bombay".into();
    assert!(workflows::apply(&hub, &outsider, posted.id, now).is_err());

    let company = workflows::notifications_for(&hub, &[workflows::company_recipient("Tech Mahindra")]).unwrap();
    assert!(company.iter().any(|n| n.title == "New application"));

    let postings = hub.load::<Postings>().unwrap();
    assert_eq!(postings[0].applications_count, 1);
    assert_eq!(application.company, "Tech Mahindra");
}
