//! End-to-end tests against a real Postgres via testcontainers.

use testcontainers::{ContainerAsync, ImageExt, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio_postgres::NoTls;

use till_core::eligibility::Eligibility;
use till_service::{ErrorKind, catalog, coupons, orders, points, preorder, users};

async fn connect(conn_str: &str) -> tokio_postgres::Client {
    let (client, connection) = tokio_postgres::connect(conn_str, NoTls)
        .await
        .expect("Failed to connect to Postgres");
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            eprintln!("Connection error: {}", e);
        }
    });
    client
}

async fn setup() -> (ContainerAsync<Postgres>, tokio_postgres::Client, String) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();

    let container = Postgres::default()
        .with_tag("18")
        .start()
        .await
        .expect("Failed to start Postgres container");

    let host = container.get_host().await.unwrap();
    let port = container.get_host_port_ipv4(5432).await.unwrap();
    let conn_str = format!(
        "host={} port={} user=postgres password=postgres dbname=postgres",
        host, port
    );

    let mut client = connect(&conn_str).await;
    till_db::MigrationRunner::new(&mut client)
        .migrate()
        .await
        .expect("Failed to run migrations");

    (container, client, conn_str)
}

async fn seed_product(client: &tokio_postgres::Client, sku: &str, price: i64) -> catalog::Product {
    catalog::create_product(
        client,
        &catalog::NewProduct {
            sku: sku.to_string(),
            name: format!("product {sku}"),
            unit_price: price,
            active: true,
        },
    )
    .await
    .expect("Failed to create product")
}

async fn order_count(client: &tokio_postgres::Client) -> i64 {
    client
        .query_one(r#"SELECT COUNT(*) FROM "order""#, &[])
        .await
        .unwrap()
        .get(0)
}

fn percent_coupon(bps: i64) -> coupons::NewCoupon {
    coupons::NewCoupon {
        name: format!("{}% off", bps / 100),
        discount: till_core::discount::Discount::Percent { bps },
        min_order_amount: 0,
        max_uses_total: None,
        starts_at: None,
        ends_at: None,
        active: true,
    }
}

fn simple_code(code: &str) -> coupons::NewCode {
    coupons::NewCode {
        code: code.to_string(),
        max_redemptions: None,
        starts_at: None,
        ends_at: None,
        expires_after_days: None,
        active: true,
    }
}

#[tokio::test]
async fn migrations_are_idempotent() {
    let (_container, mut client, _) = setup().await;

    // A second run finds nothing pending.
    let ran = till_db::MigrationRunner::new(&mut client)
        .migrate()
        .await
        .unwrap();
    assert!(ran.is_empty());
}

#[tokio::test]
async fn direct_sale_without_coupon() {
    let (_container, mut client, _) = setup().await;

    let a = seed_product(&client, "SKU-A", 5000).await;
    let b = seed_product(&client, "SKU-B", 3000).await;

    let detail = orders::create_order(
        &mut client,
        &orders::CreateOrderRequest {
            user_id: None,
            items: vec![
                orders::OrderItemRequest { product_id: a.id, quantity: 2 },
                orders::OrderItemRequest { product_id: b.id, quantity: 1 },
            ],
            coupon_code: None,
            redeem_points: None,
        },
    )
    .await
    .unwrap();

    assert_eq!(detail.order.subtotal, 13000);
    assert_eq!(detail.order.discount, 0);
    assert_eq!(detail.order.points_discount, 0);
    assert_eq!(detail.order.total, 13000);
    assert_eq!(detail.order.status, orders::OrderStatus::Paid);
    assert_eq!(detail.order.user_id, users::NON_MEMBER_USER_ID);
    assert_eq!(detail.items.len(), 2);
    assert!(detail.redemption.is_none());

    // Editing the product later must not rewrite the snapshot.
    catalog::update_product(
        &client,
        a.id,
        &catalog::ProductChanges {
            name: Some("renamed".to_string()),
            unit_price: Some(9999),
            active: None,
        },
    )
    .await
    .unwrap();

    let reread = orders::order_detail(&client, detail.order.id).await.unwrap();
    let item_a = reread
        .items
        .iter()
        .find(|i| i.product_id == a.id)
        .unwrap();
    assert_eq!(item_a.name_snapshot, "product SKU-A");
    assert_eq!(item_a.unit_price_snapshot, 5000);
    assert_eq!(item_a.line_total, 10000);
}

#[tokio::test]
async fn duplicate_line_items_rejected_before_any_write() {
    let (_container, mut client, _) = setup().await;

    let a = seed_product(&client, "SKU-A", 100).await;

    let err = orders::create_order(
        &mut client,
        &orders::CreateOrderRequest {
            user_id: None,
            items: vec![
                orders::OrderItemRequest { product_id: a.id, quantity: 1 },
                orders::OrderItemRequest { product_id: a.id, quantity: 2 },
            ],
            coupon_code: None,
            redeem_points: None,
        },
    )
    .await
    .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(order_count(&client).await, 0);
}

#[tokio::test]
async fn percent_coupon_discounts_the_order() {
    let (_container, mut client, _) = setup().await;

    let product = seed_product(&client, "SKU-A", 2000).await;
    let member = users::create_member(&client, "mei").await.unwrap();

    let coupon = coupons::create_coupon(&client, &percent_coupon(1000)).await.unwrap();
    coupons::add_code(&client, coupon.id, &simple_code("TEN-OFF")).await.unwrap();
    coupons::grant_to_user(&client, "TEN-OFF", member.id, 1).await.unwrap();

    let detail = orders::create_order(
        &mut client,
        &orders::CreateOrderRequest {
            user_id: Some(member.id),
            items: vec![orders::OrderItemRequest { product_id: product.id, quantity: 1 }],
            coupon_code: Some("TEN-OFF".to_string()),
            redeem_points: None,
        },
    )
    .await
    .unwrap();

    assert_eq!(detail.order.subtotal, 2000);
    assert_eq!(detail.order.discount, 200);
    assert_eq!(detail.order.total, 1800);

    let redemption = detail.redemption.expect("redemption row");
    assert_eq!(redemption.amount_applied, 200);
    assert_eq!(redemption.user_id, member.id);

    // The grant is spent.
    let offers = coupons::grants_for_user(&client, member.id, 2000, chrono::Utc::now())
        .await
        .unwrap();
    assert_eq!(offers.len(), 1);
    assert_eq!(offers[0].remaining_uses, 0);
    assert!(!offers[0].eligibility.is_usable());

    // And a second redemption attempt fails outright.
    let err = orders::create_order(
        &mut client,
        &orders::CreateOrderRequest {
            user_id: Some(member.id),
            items: vec![orders::OrderItemRequest { product_id: product.id, quantity: 1 }],
            coupon_code: Some("TEN-OFF".to_string()),
            redeem_points: None,
        },
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn coupon_minimum_is_three_way() {
    let (_container, mut client, _) = setup().await;

    let product = seed_product(&client, "SKU-A", 499).await;
    let member = users::create_member(&client, "mei").await.unwrap();

    let mut new_coupon = percent_coupon(1000);
    new_coupon.min_order_amount = 500;
    let coupon = coupons::create_coupon(&client, &new_coupon).await.unwrap();
    coupons::add_code(&client, coupon.id, &simple_code("MIN-500")).await.unwrap();
    coupons::grant_to_user(&client, "MIN-500", member.id, 1).await.unwrap();

    let now = chrono::Utc::now();

    // Cart total unknown: available-pending, not a hard failure.
    let offers = coupons::grants_for_user(&client, member.id, 0, now).await.unwrap();
    assert!(matches!(offers[0].eligibility, Eligibility::NeedsConfirmation { .. }));

    // Known but too small: blocked.
    let offers = coupons::grants_for_user(&client, member.id, 499, now).await.unwrap();
    assert!(matches!(offers[0].eligibility, Eligibility::Blocked { .. }));

    // Commit against the authoritative subtotal fails with the same reason.
    let err = orders::create_order(
        &mut client,
        &orders::CreateOrderRequest {
            user_id: Some(member.id),
            items: vec![orders::OrderItemRequest { product_id: product.id, quantity: 1 }],
            coupon_code: Some("MIN-500".to_string()),
            redeem_points: None,
        },
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(err.to_string().contains("minimum"));
    assert_eq!(order_count(&client).await, 0);
}

#[tokio::test]
async fn coupons_require_a_member() {
    let (_container, mut client, _) = setup().await;

    let product = seed_product(&client, "SKU-A", 100).await;

    let err = orders::create_order(
        &mut client,
        &orders::CreateOrderRequest {
            user_id: None,
            items: vec![orders::OrderItemRequest { product_id: product.id, quantity: 1 }],
            coupon_code: Some("ANY".to_string()),
            redeem_points: None,
        },
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn points_redemption_end_to_end() {
    let (_container, mut client, _) = setup().await;

    let product = seed_product(&client, "SKU-A", 500).await;
    let member = users::create_member(&client, "mei").await.unwrap();

    points::earn(&mut client, member.id, 100, None).await.unwrap();
    assert_eq!(points::balance(&client, member.id).await.unwrap(), 100);

    let detail = orders::create_order(
        &mut client,
        &orders::CreateOrderRequest {
            user_id: Some(member.id),
            items: vec![orders::OrderItemRequest { product_id: product.id, quantity: 1 }],
            coupon_code: None,
            redeem_points: Some(60),
        },
    )
    .await
    .unwrap();

    // 60 points buy 3 TWD of discount.
    assert_eq!(detail.order.subtotal, 500);
    assert_eq!(detail.order.points_discount, 3);
    assert_eq!(detail.order.total, 497);
    assert_eq!(points::balance(&client, member.id).await.unwrap(), 40);

    let ledger = points::transactions_for_user(&client, member.id).await.unwrap();
    assert_eq!(ledger.len(), 2);
    // Newest first: the redemption.
    assert_eq!(ledger[0].kind, points::TransactionKind::Redeem);
    assert_eq!(ledger[0].delta, -60);
    assert_eq!(ledger[0].balance_after, 40);
    assert_eq!(ledger[0].order_id, Some(detail.order.id));
}

#[tokio::test]
async fn invalid_redemptions_touch_nothing() {
    let (_container, mut client, _) = setup().await;

    let member = users::create_member(&client, "mei").await.unwrap();
    points::earn(&mut client, member.id, 100, None).await.unwrap();

    // Not a multiple of 20.
    let err = points::redeem(&mut client, member.id, 39, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(err.to_string().contains("multiple"));

    // More than the balance.
    let err = points::redeem(&mut client, member.id, 200, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    assert_eq!(points::balance(&client, member.id).await.unwrap(), 100);
    let ledger = points::transactions_for_user(&client, member.id).await.unwrap();
    assert_eq!(ledger.len(), 1); // only the earn
}

#[tokio::test]
async fn sku_conflicts_are_conflicts() {
    let (_container, client, _) = setup().await;

    seed_product(&client, "SKU-A", 100).await;
    let err = catalog::create_product(
        &client,
        &catalog::NewProduct {
            sku: "SKU-A".to_string(),
            name: "again".to_string(),
            unit_price: 200,
            active: true,
        },
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

async fn seed_campaign(
    client: &mut tokio_postgres::Client,
    product_id: i64,
    supply: i64,
) -> preorder::Campaign {
    let now = chrono::Utc::now();
    let campaign = preorder::create_campaign(
        client,
        &preorder::NewCampaign {
            name: "launch".to_string(),
            description: String::new(),
            starts_at: now - chrono::Duration::hours(1),
            ends_at: now + chrono::Duration::days(7),
            products: vec![preorder::NewCampaignProduct {
                product_id,
                supply_quantity: supply,
            }],
        },
    )
    .await
    .expect("Failed to create campaign");
    preorder::activate_campaign(client, campaign.id).await.unwrap();
    campaign
}

fn preorder_request(campaign_id: i64, product_id: i64, quantity: i64) -> preorder::PreorderRequest {
    preorder::PreorderRequest {
        campaign_id,
        product_id,
        quantity,
        user_id: None,
        customer_name: "Lin".to_string(),
        customer_phone: "0912345678".to_string(),
    }
}

#[tokio::test]
async fn reservation_respects_the_supply_cap() {
    let (_container, mut client, _) = setup().await;

    let product = seed_product(&client, "SKU-A", 1000).await;
    let campaign = seed_campaign(&mut client, product.id, 20).await;

    let receipt =
        preorder::create_preorder_order(&mut client, &preorder_request(campaign.id, product.id, 18))
            .await
            .unwrap();
    assert_eq!(receipt.remaining_quantity, 2);
    assert_eq!(receipt.total_amount, 18_000);

    // 18 + 3 > 20: rejected, nothing reserved.
    let err =
        preorder::create_preorder_order(&mut client, &preorder_request(campaign.id, product.id, 3))
            .await
            .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    let (_, products) = preorder::active_campaign(&client).await.unwrap().unwrap();
    assert_eq!(products[0].reserved_quantity, 18);

    // 18 + 2 == 20: fits exactly.
    let receipt =
        preorder::create_preorder_order(&mut client, &preorder_request(campaign.id, product.id, 2))
            .await
            .unwrap();
    assert_eq!(receipt.remaining_quantity, 0);

    let (_, products) = preorder::active_campaign(&client).await.unwrap().unwrap();
    assert_eq!(products[0].reserved_quantity, 20);
}

#[tokio::test]
async fn concurrent_reservations_cannot_oversell() {
    let (_container, mut client, conn_str) = setup().await;

    let product = seed_product(&client, "SKU-A", 1000).await;
    let campaign = seed_campaign(&mut client, product.id, 20).await;

    // Fill to 17 so only one of two requests for 2 can fit.
    preorder::create_preorder_order(&mut client, &preorder_request(campaign.id, product.id, 17))
        .await
        .unwrap();

    let mut client_a = connect(&conn_str).await;
    let mut client_b = connect(&conn_str).await;
    let req_a = preorder_request(campaign.id, product.id, 2);
    let req_b = preorder_request(campaign.id, product.id, 2);

    let task_a =
        tokio::spawn(async move { preorder::create_preorder_order(&mut client_a, &req_a).await });
    let task_b =
        tokio::spawn(async move { preorder::create_preorder_order(&mut client_b, &req_b).await });

    let result_a = task_a.await.unwrap();
    let result_b = task_b.await.unwrap();

    let successes = [&result_a, &result_b].iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1, "exactly one of two racing reservations may win");

    let (_, products) = preorder::active_campaign(&client).await.unwrap().unwrap();
    assert_eq!(products[0].reserved_quantity, 19);
    assert!(products[0].reserved_quantity <= products[0].supply_quantity);
}

#[tokio::test]
async fn cancelling_a_preorder_releases_the_quota() {
    let (_container, mut client, _) = setup().await;

    let product = seed_product(&client, "SKU-A", 1000).await;
    let campaign = seed_campaign(&mut client, product.id, 5).await;

    let receipt =
        preorder::create_preorder_order(&mut client, &preorder_request(campaign.id, product.id, 3))
            .await
            .unwrap();
    assert_eq!(receipt.remaining_quantity, 2);

    let order = orders::order_by_number(&client, &receipt.order_number)
        .await
        .unwrap()
        .expect("order exists");
    assert_eq!(order.status, orders::OrderStatus::Created);

    let preorder_id: i64 = client
        .query_one("SELECT id FROM preorder_order WHERE order_id = $1", &[&order.id])
        .await
        .unwrap()
        .get(0);
    preorder::cancel_preorder(&mut client, preorder_id).await.unwrap();

    let cancelled = orders::order_detail(&client, order.id).await.unwrap();
    assert_eq!(cancelled.order.status, orders::OrderStatus::Cancelled);

    let (_, products) = preorder::active_campaign(&client).await.unwrap().unwrap();
    assert_eq!(products[0].reserved_quantity, 0);
}

#[tokio::test]
async fn paying_a_preorder_earns_points() {
    let (_container, mut client, _) = setup().await;

    let product = seed_product(&client, "SKU-A", 1500).await;
    let campaign = seed_campaign(&mut client, product.id, 5).await;
    let member = users::create_member(&client, "mei").await.unwrap();

    let mut req = preorder_request(campaign.id, product.id, 2);
    req.user_id = Some(member.id);
    let receipt = preorder::create_preorder_order(&mut client, &req).await.unwrap();

    let order = orders::order_by_number(&client, &receipt.order_number)
        .await
        .unwrap()
        .unwrap();

    orders::update_status(&mut client, order.id, orders::OrderStatus::Confirmed)
        .await
        .unwrap();
    orders::update_status(&mut client, order.id, orders::OrderStatus::Paid)
        .await
        .unwrap();

    // 1 point per TWD of paid total.
    assert_eq!(points::balance(&client, member.id).await.unwrap(), 3000);
    let ledger = points::transactions_for_user(&client, member.id).await.unwrap();
    assert_eq!(ledger[0].kind, points::TransactionKind::Earn);
    assert_eq!(ledger[0].delta, 3000);

    // Paid is terminal except for cancellation.
    let err = orders::update_status(&mut client, order.id, orders::OrderStatus::Created)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn coupon_cap_failure_aborts_the_whole_order() {
    let (_container, mut client, _) = setup().await;

    let product = seed_product(&client, "SKU-A", 1000).await;
    let alice = users::create_member(&client, "alice").await.unwrap();
    let bob = users::create_member(&client, "bob").await.unwrap();

    // A coupon that may only ever be redeemed once, granted to two members.
    let mut new_coupon = percent_coupon(1000);
    new_coupon.max_uses_total = Some(1);
    let coupon = coupons::create_coupon(&client, &new_coupon).await.unwrap();
    coupons::add_code(&client, coupon.id, &simple_code("ONCE")).await.unwrap();
    coupons::grant_to_user(&client, "ONCE", alice.id, 1).await.unwrap();
    coupons::grant_to_user(&client, "ONCE", bob.id, 1).await.unwrap();

    orders::create_order(
        &mut client,
        &orders::CreateOrderRequest {
            user_id: Some(alice.id),
            items: vec![orders::OrderItemRequest { product_id: product.id, quantity: 1 }],
            coupon_code: Some("ONCE".to_string()),
            redeem_points: None,
        },
    )
    .await
    .unwrap();

    let before = order_count(&client).await;

    // Bob's own grant is intact, so eligibility passes; the global cap is
    // only caught at consume time, after the order row was inserted inside
    // the transaction. The rollback must erase it.
    let err = orders::create_order(
        &mut client,
        &orders::CreateOrderRequest {
            user_id: Some(bob.id),
            items: vec![orders::OrderItemRequest { product_id: product.id, quantity: 1 }],
            coupon_code: Some("ONCE".to_string()),
            redeem_points: None,
        },
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    assert_eq!(order_count(&client).await, before);
    let offers = coupons::grants_for_user(&client, bob.id, 1000, chrono::Utc::now())
        .await
        .unwrap();
    assert_eq!(offers[0].remaining_uses, 1, "bob's grant must be untouched");
}

#[tokio::test]
async fn expired_coupon_window_blocks_commit() {
    let (_container, mut client, _) = setup().await;

    let product = seed_product(&client, "SKU-A", 1000).await;
    let member = users::create_member(&client, "mei").await.unwrap();

    let mut new_coupon = percent_coupon(500);
    new_coupon.ends_at = Some(chrono::Utc::now() - chrono::Duration::days(1));
    let coupon = coupons::create_coupon(&client, &new_coupon).await.unwrap();
    coupons::add_code(&client, coupon.id, &simple_code("LATE")).await.unwrap();
    coupons::grant_to_user(&client, "LATE", member.id, 1).await.unwrap();

    let err = orders::create_order(
        &mut client,
        &orders::CreateOrderRequest {
            user_id: Some(member.id),
            items: vec![orders::OrderItemRequest { product_id: product.id, quantity: 1 }],
            coupon_code: Some("LATE".to_string()),
            redeem_points: None,
        },
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(err.to_string(), "coupon has expired");

    // Unknown codes are NotFound, not Validation.
    let err = coupons::grant_to_user(&client, "NO-SUCH-CODE", member.id, 1)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}
