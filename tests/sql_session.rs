use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use lodge::engine::Engine;
use lodge::wire;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, Arc<Engine>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("lodge_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let engine = Arc::new(Engine::new(dir.join("lodge.wal")).unwrap());

    let engine2 = engine.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let engine = engine2.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(
                    socket,
                    engine,
                    "admin".to_string(),
                    "lodge".to_string(),
                )
                .await;
            });
        }
    });

    (addr, engine)
}

async fn connect_as(addr: SocketAddr, user: &str, password: &str) -> Result<Client, tokio_postgres::Error> {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("lodge")
        .user(user)
        .password(password);

    let (client, connection) = config.connect(NoTls).await?;
    tokio::spawn(async move {
        let _ = connection.await;
    });
    Ok(client)
}

async fn connect(addr: SocketAddr) -> Client {
    connect_as(addr, "admin", "lodge").await.unwrap()
}

async fn rows(client: &Client, sql: &str) -> Vec<SimpleQueryRow> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|msg| match msg {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

async fn seed(client: &Client) -> (Ulid, Ulid) {
    let cabin = Ulid::new();
    let guest = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO cabins (id, name, capacity) VALUES ('{cabin}', 'Pine', 4)"
        ))
        .await
        .unwrap();
    client
        .batch_execute(&format!(
            "INSERT INTO guests (id, name, document, phone) VALUES ('{guest}', 'Ada', 'X-1', '555-0100')"
        ))
        .await
        .unwrap();
    (cabin, guest)
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn booking_session_end_to_end() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    let (cabin, guest) = seed(&client).await;

    let reservation = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO reservations (id, guest_id, cabin_id, check_in, check_out) \
             VALUES ('{reservation}', '{guest}', '{cabin}', '2024-07-01', '2024-07-04')"
        ))
        .await
        .unwrap();

    let listed = rows(&client, &format!("SELECT * FROM reservations WHERE cabin_id = '{cabin}'")).await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].get("guest_name"), Some("Ada"));
    assert_eq!(listed[0].get("cabin_name"), Some("Pine"));
    assert_eq!(listed[0].get("nights"), Some("3"));

    let payment = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO payments (id, reservation_id, amount, method, recorded_on) \
             VALUES ('{payment}', '{reservation}', '150.50', 'card', '2024-07-01')"
        ))
        .await
        .unwrap();

    let total = rows(&client, "SELECT * FROM revenue_total WHERE month = 7 AND year = 2024").await;
    assert_eq!(total.len(), 1);
    assert_eq!(total[0].get("payments"), Some("1"));
    assert_eq!(total[0].get("total"), Some("150.50"));

    client
        .batch_execute(&format!("DELETE FROM reservations WHERE id = '{reservation}'"))
        .await
        .unwrap();
    assert!(rows(&client, "SELECT * FROM payments").await.is_empty());
}

#[tokio::test]
async fn overlapping_stay_is_an_exclusion_violation() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    let (cabin, guest) = seed(&client).await;

    client
        .batch_execute(&format!(
            "INSERT INTO reservations (guest_id, cabin_id, check_in, check_out) \
             VALUES ('{guest}', '{cabin}', '2024-07-01', '2024-07-05')"
        ))
        .await
        .unwrap();

    let err = client
        .batch_execute(&format!(
            "INSERT INTO reservations (guest_id, cabin_id, check_in, check_out) \
             VALUES ('{guest}', '{cabin}', '2024-07-04', '2024-07-06')"
        ))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(&SqlState::EXCLUSION_VIOLATION));

    // Same-day turnover is fine.
    client
        .batch_execute(&format!(
            "INSERT INTO reservations (guest_id, cabin_id, check_in, check_out) \
             VALUES ('{guest}', '{cabin}', '2024-07-05', '2024-07-06')"
        ))
        .await
        .unwrap();
}

#[tokio::test]
async fn deleting_booked_cabin_is_refused() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    let (cabin, guest) = seed(&client).await;

    client
        .batch_execute(&format!(
            "INSERT INTO reservations (guest_id, cabin_id, check_in, check_out) \
             VALUES ('{guest}', '{cabin}', '2024-08-01', '2024-08-02')"
        ))
        .await
        .unwrap();

    let err = client
        .batch_execute(&format!("DELETE FROM cabins WHERE id = '{cabin}'"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(&SqlState::FOREIGN_KEY_VIOLATION));

    let err = client
        .batch_execute(&format!("DELETE FROM guests WHERE id = '{guest}'"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(&SqlState::FOREIGN_KEY_VIOLATION));
}

#[tokio::test]
async fn returning_hands_back_generated_id() {
    let (addr, engine) = start_test_server().await;
    let client = connect(addr).await;
    let (cabin, guest) = seed(&client).await;

    let returned = rows(
        &client,
        &format!(
            "INSERT INTO reservations (guest_id, cabin_id, check_in, check_out) \
             VALUES ('{guest}', '{cabin}', '2024-07-10', '2024-07-12') RETURNING id"
        ),
    )
    .await;
    assert_eq!(returned.len(), 1);
    let id: Ulid = returned[0].get("id").unwrap().parse().unwrap();
    assert_eq!(engine.cabin_for_reservation(&id), Some(cabin));
}

#[tokio::test]
async fn availability_grid_over_the_wire() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    let (cabin, guest) = seed(&client).await;

    client
        .batch_execute(&format!(
            "INSERT INTO reservations (guest_id, cabin_id, check_in, check_out) \
             VALUES ('{guest}', '{cabin}', '2024-07-02', '2024-07-04')"
        ))
        .await
        .unwrap();

    let grid = rows(
        &client,
        &format!(
            "SELECT * FROM availability WHERE cabin_id = '{cabin}' \
             AND start >= '2024-07-01' AND \"end\" <= '2024-07-04'"
        ),
    )
    .await;
    let days: Vec<(&str, &str)> = grid
        .iter()
        .map(|r| (r.get("date").unwrap(), r.get("status").unwrap()))
        .collect();
    assert_eq!(
        days,
        vec![
            ("2024-07-01", "free"),
            ("2024-07-02", "occupied"),
            ("2024-07-03", "occupied"),
            ("2024-07-04", "free"),
        ]
    );
    assert!(grid.iter().all(|r| r.get("cabin_name") == Some("Pine")));
}

#[tokio::test]
async fn bound_text_containing_placeholders_is_kept_verbatim() {
    let (addr, engine) = start_test_server().await;
    let client = connect(addr).await;

    let id = Ulid::new();
    let id_text = id.to_string();
    client
        .execute(
            "INSERT INTO guests (id, name, document) VALUES ($1, $2, $3)",
            &[&id_text, &"Suite $1 guest", &"D-$2"],
        )
        .await
        .unwrap();

    let guest = engine.guest(id).await.unwrap();
    assert_eq!(guest.name, "Suite $1 guest");
    assert_eq!(guest.document, "D-$2");
}

#[tokio::test]
async fn stay_check_reports_whether_a_stay_fits() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    let (cabin, guest) = seed(&client).await;

    client
        .batch_execute(&format!(
            "INSERT INTO reservations (guest_id, cabin_id, check_in, check_out) \
             VALUES ('{guest}', '{cabin}', '2024-07-01', '2024-07-05')"
        ))
        .await
        .unwrap();

    let check = |check_in: &str, check_out: &str| {
        format!(
            "SELECT * FROM stay_check WHERE cabin_id = '{cabin}' \
             AND check_in = '{check_in}' AND check_out = '{check_out}'"
        )
    };
    let taken = rows(&client, &check("2024-07-04", "2024-07-06")).await;
    assert_eq!(taken.len(), 1);
    assert_eq!(taken[0].get("status"), Some("occupied"));
    assert_eq!(taken[0].get("nights"), Some("2"));

    let turnover = rows(&client, &check("2024-07-05", "2024-07-06")).await;
    assert_eq!(turnover[0].get("status"), Some("free"));

    let err = client
        .simple_query(&check("2024-07-06", "2024-07-06"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(&SqlState::INVALID_DATETIME_FORMAT));
}

#[tokio::test]
async fn missing_row_lookup_is_empty() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    assert!(rows(&client, &format!("SELECT * FROM cabins WHERE id = '{}'", Ulid::new())).await.is_empty());
}

#[tokio::test]
async fn malformed_sql_is_a_syntax_error() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;

    let err = client.batch_execute("SELEC nonsense").await.unwrap_err();
    assert_eq!(err.code(), Some(&SqlState::SYNTAX_ERROR));

    let err = client.batch_execute("SELECT * FROM bookings").await.unwrap_err();
    assert_eq!(err.code(), Some(&SqlState::UNDEFINED_TABLE));
}

#[tokio::test]
async fn wrong_user_cannot_log_in() {
    let (addr, _engine) = start_test_server().await;
    assert!(connect_as(addr, "mallory", "lodge").await.is_err());
    assert!(connect_as(addr, "admin", "wrong").await.is_err());
}
