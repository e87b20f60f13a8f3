use chrono::Utc;
use courtside::{
    domain::{
        BillingInterval, CreateClubRequest, CreatePlanRequest, CreateUserRequest,
        MembershipSubscription, SubscriptionPaymentStatus, SubscriptionStatus,
    },
    repository::{
        BalanceRepository, ClubRepository, MembershipRepository, SqliteBalanceRepository,
        SqliteClubRepository, SqliteMembershipRepository, SqliteUserRepository, UserRepository,
    },
};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use uuid::Uuid;

async fn setup() -> anyhow::Result<(SqlitePool, Uuid, Uuid)> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let user = SqliteUserRepository::new(pool.clone())
        .create(
            CreateUserRequest {
                email: "player@example.com".to_string(),
                display_name: "Player".to_string(),
                password: "unused-password".to_string(),
            },
            "hash".to_string(),
        )
        .await?;
    let club = SqliteClubRepository::new(pool.clone())
        .create(CreateClubRequest { name: "Lakeside".to_string() }, user.id)
        .await?;
    Ok((pool, user.id, club.id))
}

#[tokio::test]
async fn test_plans_and_subscription_lifecycle() -> anyhow::Result<()> {
    let (pool, user_id, club_id) = setup().await?;
    let repo = SqliteMembershipRepository::new(pool.clone());

    let annual = repo
        .create_plan(
            club_id,
            CreatePlanRequest {
                name: "Annual".to_string(),
                price_cents: 40_000,
                billing_interval: "year".to_string(),
            },
            BillingInterval::Year,
        )
        .await?;
    repo.create_plan(
        club_id,
        CreatePlanRequest {
            name: "Monthly".to_string(),
            price_cents: 4_000,
            billing_interval: "month".to_string(),
        },
        BillingInterval::Month,
    )
    .await?;

    let plans = repo.list_plans(club_id).await?;
    assert_eq!(plans.len(), 2);
    assert_eq!(plans[0].name, "Monthly");
    assert_eq!(repo.find_plan(annual.id).await?.unwrap().billing_interval, BillingInterval::Year);

    let now = Utc::now();
    let created = repo
        .create_subscription(MembershipSubscription {
            id: Uuid::new_v4(),
            club_id,
            user_id,
            plan_id: annual.id,
            status: SubscriptionStatus::Incomplete,
            payment_status: SubscriptionPaymentStatus::RequiresPayment,
            price_cents: annual.price_cents,
            billing_interval: annual.billing_interval,
            checkout_session_id: "cs_test_annual".to_string(),
            stripe_subscription_id: None,
            stripe_customer_id: None,
            created_at: now,
            updated_at: now,
        })
        .await?;

    let mine = repo.list_subscriptions_for_user(user_id).await?;
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].checkout_session_id, "cs_test_annual");

    let canceled = repo.mark_canceled(created.id).await?;
    assert_eq!(canceled.status, SubscriptionStatus::Canceled);
    let again = repo.mark_canceled(created.id).await?;
    assert_eq!(again.status, SubscriptionStatus::Canceled);
    Ok(())
}

#[tokio::test]
async fn test_credits_move_balance_and_append_ledger() -> anyhow::Result<()> {
    let (pool, user_id, club_id) = setup().await?;
    let repo = SqliteBalanceRepository::new(pool.clone());

    assert!(repo.get_balance(user_id, club_id).await?.is_none());

    let first = repo
        .credit(user_id, club_id, 2_000, Some("pi_first"), "Balance top-up")
        .await?;
    assert_eq!(first.balance_before_cents, 0);
    assert_eq!(first.balance_after_cents, 2_000);

    let second = repo
        .credit(user_id, club_id, 1_500, Some("pi_second"), "Balance top-up")
        .await?;
    assert_eq!(second.balance_before_cents, 2_000);
    assert_eq!(second.balance_after_cents, 3_500);

    let balance = repo.get_balance(user_id, club_id).await?.unwrap();
    assert_eq!(balance.balance_cents, 3_500);

    let ledger = repo.list_transactions(user_id, club_id, 10).await?;
    assert_eq!(ledger.len(), 2);
    let references: Vec<_> = ledger.iter().filter_map(|t| t.payment_reference.as_deref()).collect();
    assert!(references.contains(&"pi_first"));
    assert!(references.contains(&"pi_second"));

    assert_eq!(repo.list_transactions(user_id, club_id, 1).await?.len(), 1);
    Ok(())
}
