use clap::{Parser, Subcommand};
use courtside::{
    config::Settings,
    error::AppError,
    domain::{CreateBookingRequest, CreateClubRequest, CreateCourtRequest, CreatePlanRequest, CreateUserRequest},
    service::ServiceContext,
};
use fake::{
    faker::name::en::{FirstName, LastName},
    Fake,
};
use sqlx::sqlite::SqlitePoolOptions;

#[derive(Parser)]
#[command(name = "setup")]
#[command(about = "Configuration checks and demo data for Courtside")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify configuration loads and report what payments still need
    Check,
    /// Create a demo admin, club, courts, plans and members
    Seed {
        /// Number of demo members to create
        #[arg(long, default_value_t = 4)]
        members: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::Check => check(),
        Commands::Seed { members } => seed(members).await,
    }
}

fn check() -> anyhow::Result<()> {
    println!("🔍 Checking configuration...");
    let settings = Settings::new()?;
    println!("  ✅ Configuration loaded");
    println!("  • database: {}", settings.database.url);
    println!("  • public url: {}", settings.server.base_url);

    if settings.auth.jwt_secret == "change-me-in-production" {
        println!("  ⚠️  auth.jwt_secret is still the default; set COURTSIDE__AUTH__JWT_SECRET");
    }

    let stripe = &settings.stripe;
    if !stripe.enabled {
        println!("  ⚠️  Stripe is disabled; payment endpoints will answer 503");
        println!("     Set COURTSIDE__STRIPE__ENABLED=true to turn it on.");
        return Ok(());
    }

    let mut missing = Vec::new();
    if stripe.secret_key.as_deref().map_or(true, str::is_empty) {
        missing.push("COURTSIDE__STRIPE__SECRET_KEY");
    }
    if stripe.webhook_secret.as_deref().map_or(true, str::is_empty) {
        missing.push("COURTSIDE__STRIPE__WEBHOOK_SECRET");
    }
    if !missing.is_empty() {
        anyhow::bail!("Stripe is enabled but missing: {}", missing.join(", "));
    }

    println!("  ✅ Stripe keys present (platform fee {} bps, {})", stripe.platform_fee_bps, stripe.currency);
    println!();
    println!("Next steps:");
    println!("  1. Point a Stripe webhook at {}/api/payments/webhook", settings.server.base_url);
    println!("     with checkout.session.completed, payment_intent.succeeded,");
    println!("     payment_intent.payment_failed,");
    println!("     account.updated, invoice.paid, invoice.payment_failed and");
    println!("     customer.subscription.deleted enabled.");
    println!("  2. Have each club admin call POST /api/clubs/:club_id/connect/onboard");
    println!("     and finish Stripe's onboarding before taking payments.");
    Ok(())
}

async fn seed(member_count: usize) -> anyhow::Result<()> {
    println!("🌱 Starting database seeding...");
    let settings = Settings::new().unwrap_or_default();

    let db_pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&settings.database.url)
        .await?;

    println!("📋 Running migrations...");
    sqlx::migrate!("./migrations").run(&db_pool).await?;

    let ctx = ServiceContext::new(db_pool, &settings, None);

    println!("👤 Creating admin...");
    let admin = ctx
        .user_service
        .register(CreateUserRequest {
            email: "admin@courtside.local".to_string(),
            display_name: "Club Admin".to_string(),
            password: "admin-password".to_string(),
        })
        .await?
        .user;
    println!("  ✅ Created admin user (admin@courtside.local / admin-password)");

    println!("🎾 Creating club...");
    let club = ctx
        .club_service
        .create_club(&admin, CreateClubRequest { name: "Riverside Tennis Club".to_string() })
        .await?;
    let mut courts = Vec::new();
    for name in ["Centre Court", "Court 2", "Court 3"] {
        courts.push(
            ctx.club_service
                .add_court(&admin, club.id, CreateCourtRequest { name: name.to_string() })
                .await?,
        );
    }
    println!("  ✅ Created {} with {} courts", club.name, courts.len());

    for (name, price_cents, interval) in [
        ("Monthly", 4_500, "month"),
        ("Annual", 45_000, "year"),
        ("Summer pass", 12_000, "one_time"),
    ] {
        ctx.club_service
            .create_plan(
                &admin,
                club.id,
                CreatePlanRequest {
                    name: name.to_string(),
                    price_cents,
                    billing_interval: interval.to_string(),
                },
            )
            .await?;
    }
    println!("  ✅ Created 3 membership plans");

    println!("👥 Creating members...");
    let tomorrow = (chrono::Utc::now() + chrono::Duration::days(1))
        .format("%Y-%m-%d")
        .to_string();
    for i in 0..member_count {
        let first: String = FirstName().fake();
        let last: String = LastName().fake();
        let member = ctx
            .user_service
            .register(CreateUserRequest {
                email: format!("{}.{}{}@example.com", email_part(&first), email_part(&last), i),
                display_name: format!("{} {}", first, last),
                password: "password123".to_string(),
            })
            .await?
            .user;

        let court = &courts[i % courts.len()];
        let hour = 8 + (i / courts.len()) % 13;
        let booked = ctx
            .booking_service
            .create_booking(
                &member,
                CreateBookingRequest {
                    club_id: club.id.to_string(),
                    court_id: court.id.to_string(),
                    date: tomorrow.clone(),
                    start_time: format!("{}:00", hour),
                    end_time: format!("{}:00", hour + 1),
                    display_name: None,
                    notes: None,
                    cost_cents: 2_500,
                },
            )
            .await;
        match booked {
            Ok(_) => println!("  ✅ {} booked {} at {}:00", member.display_name, court.name, hour),
            Err(AppError::SlotConflict) => println!("  • {} joined (no free demo slot)", member.display_name),
            Err(e) => return Err(e.into()),
        }
    }

    println!("🎉 Seeding complete");
    Ok(())
}

fn email_part(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_lowercase()
}
