//! Registered schema migrations.
//!
//! Money columns are integer minor-currency units (TWD). Timestamps are
//! `TIMESTAMPTZ` and always hold UTC; conversion to the business-local
//! offset happens in code, never in SQL.

use crate::Migration;

inventory::submit! {
    Migration {
        version: "0001_create_schema",
        name: "create base tables",
        statements: &[
            // Members. Row 0 is the non-member sentinel that anonymous
            // orders attach to; it never earns or redeems points.
            r#"CREATE TABLE app_user (
                id BIGSERIAL PRIMARY KEY,
                display_name TEXT NOT NULL DEFAULT '',
                points BIGINT NOT NULL DEFAULT 0 CHECK (points >= 0),
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )"#,
            r#"INSERT INTO app_user (id, display_name) VALUES (0, 'non-member')"#,

            r#"CREATE TABLE product (
                id BIGSERIAL PRIMARY KEY,
                sku TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                unit_price BIGINT NOT NULL CHECK (unit_price >= 0),
                active BOOLEAN NOT NULL DEFAULT TRUE,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )"#,

            // order_number is practically unique (timestamp + random
            // suffix) but intentionally not constrained.
            r#"CREATE TABLE "order" (
                id BIGSERIAL PRIMARY KEY,
                order_number TEXT NOT NULL,
                user_id BIGINT NOT NULL REFERENCES app_user (id),
                subtotal BIGINT NOT NULL CHECK (subtotal >= 0),
                discount BIGINT NOT NULL DEFAULT 0 CHECK (discount >= 0),
                points_discount BIGINT NOT NULL DEFAULT 0 CHECK (points_discount >= 0),
                total BIGINT NOT NULL CHECK (total >= 0),
                status TEXT NOT NULL CHECK (status IN ('created', 'confirmed', 'paid', 'cancelled')),
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                CHECK (total = subtotal - discount - points_discount)
            )"#,
            r#"CREATE INDEX order_number_idx ON "order" (order_number)"#,
            r#"CREATE INDEX order_user_idx ON "order" (user_id)"#,

            // Name and price are snapshots taken at order time; later
            // product edits never rewrite history.
            r#"CREATE TABLE order_item (
                id BIGSERIAL PRIMARY KEY,
                order_id BIGINT NOT NULL REFERENCES "order" (id),
                product_id BIGINT NOT NULL REFERENCES product (id),
                name_snapshot TEXT NOT NULL,
                quantity BIGINT NOT NULL CHECK (quantity > 0),
                unit_price_snapshot BIGINT NOT NULL CHECK (unit_price_snapshot >= 0),
                line_total BIGINT NOT NULL CHECK (line_total = quantity * unit_price_snapshot)
            )"#,
            r#"CREATE INDEX order_item_order_idx ON order_item (order_id)"#,

            // Exactly one of the discount parameters is set, matching the
            // discount type.
            r#"CREATE TABLE coupon (
                id BIGSERIAL PRIMARY KEY,
                name TEXT NOT NULL,
                discount_type TEXT NOT NULL CHECK (discount_type IN ('PERCENT', 'FIXED')),
                percent_off_bps BIGINT CHECK (percent_off_bps BETWEEN 0 AND 10000),
                amount_off_twd BIGINT CHECK (amount_off_twd > 0),
                min_order_amount BIGINT NOT NULL DEFAULT 0 CHECK (min_order_amount >= 0),
                max_uses_total BIGINT,
                starts_at TIMESTAMPTZ,
                ends_at TIMESTAMPTZ,
                active BOOLEAN NOT NULL DEFAULT TRUE,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                CHECK (
                    (discount_type = 'PERCENT' AND percent_off_bps IS NOT NULL AND amount_off_twd IS NULL)
                    OR (discount_type = 'FIXED' AND amount_off_twd IS NOT NULL AND percent_off_bps IS NULL)
                )
            )"#,

            r#"CREATE TABLE coupon_code (
                id BIGSERIAL PRIMARY KEY,
                coupon_id BIGINT NOT NULL REFERENCES coupon (id),
                code TEXT NOT NULL UNIQUE,
                max_redemptions BIGINT,
                starts_at TIMESTAMPTZ,
                ends_at TIMESTAMPTZ,
                expires_after_days INT,
                active BOOLEAN NOT NULL DEFAULT TRUE
            )"#,

            r#"CREATE TABLE coupon_grant (
                id BIGSERIAL PRIMARY KEY,
                coupon_code_id BIGINT NOT NULL REFERENCES coupon_code (id),
                user_id BIGINT NOT NULL REFERENCES app_user (id),
                allowed_uses INT NOT NULL CHECK (allowed_uses > 0),
                used_count INT NOT NULL DEFAULT 0 CHECK (used_count >= 0 AND used_count <= allowed_uses),
                granted_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                expires_at TIMESTAMPTZ
            )"#,
            r#"CREATE INDEX coupon_grant_user_idx ON coupon_grant (user_id)"#,

            // Append-only audit trail; one row per coupon use per order.
            r#"CREATE TABLE coupon_redemption (
                id BIGSERIAL PRIMARY KEY,
                order_id BIGINT NOT NULL REFERENCES "order" (id),
                coupon_id BIGINT NOT NULL REFERENCES coupon (id),
                coupon_code_id BIGINT NOT NULL REFERENCES coupon_code (id),
                user_id BIGINT NOT NULL REFERENCES app_user (id),
                amount_applied BIGINT NOT NULL CHECK (amount_applied >= 0),
                redeemed_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )"#,
            r#"CREATE INDEX coupon_redemption_coupon_idx ON coupon_redemption (coupon_id)"#,

            // Append-only ledger; app_user.points is the denormalized
            // running sum, written in the same transaction as each row.
            r#"CREATE TABLE points_transaction (
                id BIGSERIAL PRIMARY KEY,
                user_id BIGINT NOT NULL REFERENCES app_user (id),
                order_id BIGINT REFERENCES "order" (id),
                delta BIGINT NOT NULL,
                kind TEXT NOT NULL CHECK (kind IN ('EARN', 'REDEEM')),
                balance_after BIGINT NOT NULL CHECK (balance_after >= 0),
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )"#,
            r#"CREATE INDEX points_transaction_user_idx ON points_transaction (user_id)"#,

            r#"CREATE TABLE preorder_campaign (
                id BIGSERIAL PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                active BOOLEAN NOT NULL DEFAULT FALSE,
                starts_at TIMESTAMPTZ NOT NULL,
                ends_at TIMESTAMPTZ NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )"#,

            r#"CREATE TABLE preorder_campaign_product (
                id BIGSERIAL PRIMARY KEY,
                campaign_id BIGINT NOT NULL REFERENCES preorder_campaign (id),
                product_id BIGINT NOT NULL REFERENCES product (id),
                supply_quantity BIGINT NOT NULL CHECK (supply_quantity >= 0),
                reserved_quantity BIGINT NOT NULL DEFAULT 0
                    CHECK (reserved_quantity >= 0 AND reserved_quantity <= supply_quantity),
                UNIQUE (campaign_id, product_id)
            )"#,

            r#"CREATE TABLE preorder_order (
                id BIGSERIAL PRIMARY KEY,
                campaign_id BIGINT NOT NULL REFERENCES preorder_campaign (id),
                product_id BIGINT NOT NULL REFERENCES product (id),
                quantity BIGINT NOT NULL CHECK (quantity > 0),
                order_id BIGINT NOT NULL REFERENCES "order" (id),
                customer_name TEXT NOT NULL,
                customer_phone TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )"#,
            r#"CREATE INDEX preorder_order_order_idx ON preorder_order (order_id)"#,
        ],
    }
}

#[cfg(test)]
mod tests {
    use crate::Migration;

    #[test]
    fn initial_schema_is_registered() {
        let found = inventory::iter::<Migration>
            .into_iter()
            .any(|m| m.version == "0001_create_schema");
        assert!(found);
    }

    #[test]
    fn versions_are_unique() {
        let mut versions: Vec<_> = inventory::iter::<Migration>
            .into_iter()
            .map(|m| m.version)
            .collect();
        versions.sort_unstable();
        let before = versions.len();
        versions.dedup();
        assert_eq!(before, versions.len());
    }
}
