use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use client_core::{
    categories_of, filter_listings, format_price, CategoryFilter, DurableIdentityProvider,
    ListingCatalog, ListingQuery, SessionManager,
};
use shared::domain::{AccountStatus, ListingId, PriceType};
use storage::{NewListing, NewOrganization, Storage};
use uuid::Uuid;

mod config;

#[derive(Parser, Debug)]
struct Cli {
    /// Overrides the configured database url.
    #[arg(long)]
    database_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    CreateOrganization {
        name: String,
        contact_name: String,
        contact_email: String,
        #[arg(long)]
        location: Option<String>,
        #[arg(long)]
        affiliation: Option<String>,
        #[arg(long)]
        referral_code: Option<String>,
    },
    /// Marks a pending organization as active so its referral code vouches
    /// for new members.
    ApproveOrganization {
        referral_code: String,
    },
    SignUp {
        email: String,
        password: String,
        full_name: String,
    },
    SignIn {
        email: String,
        password: String,
    },
    CreateListing {
        provider_email: String,
        title: String,
        description: String,
        category: String,
        #[arg(long)]
        price_min: Option<f64>,
        #[arg(long)]
        price_max: Option<f64>,
        #[arg(long, default_value = "fixed")]
        price_type: String,
        #[arg(long)]
        location: Option<String>,
    },
    Browse {
        #[arg(long, default_value = "")]
        search: String,
        #[arg(long, default_value = "all")]
        category: String,
    },
    Show {
        listing_id: String,
    },
    RemoveMember {
        email: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let cli = Cli::parse();
    let settings = config::load_settings();
    let database_url =
        config::normalize_database_url(&cli.database_url.unwrap_or(settings.database_url));
    let storage = Storage::new(&database_url).await?;

    match cli.command {
        Command::CreateOrganization {
            name,
            contact_name,
            contact_email,
            location,
            affiliation,
            referral_code,
        } => {
            let referral_code = referral_code
                .unwrap_or_else(|| Uuid::new_v4().simple().to_string()[..8].to_uppercase());
            let organization = storage
                .create_organization(NewOrganization {
                    name,
                    contact_name,
                    contact_email,
                    location,
                    affiliation,
                    referral_code,
                })
                .await?;
            println!(
                "created organization {} (referral code {})",
                organization.organization_id, organization.referral_code
            );
        }
        Command::ApproveOrganization { referral_code } => {
            let organization = storage
                .organization_by_referral_code(&referral_code)
                .await?
                .ok_or_else(|| anyhow!("no organization with referral code '{referral_code}'"))?;
            storage
                .set_organization_status(&organization.organization_id, AccountStatus::Active)
                .await?;
            println!(
                "approved organization {} ({})",
                organization.name, organization.organization_id
            );
        }
        Command::SignUp {
            email,
            password,
            full_name,
        } => {
            let manager = session_manager(storage, settings.provider_timeout_seconds);
            let member = manager
                .sign_up(&email, &password, &full_name)
                .await
                .map_err(|err| anyhow!("{err}"))?;
            println!("signed up member {} ({})", member.member_id, member.email);
        }
        Command::SignIn { email, password } => {
            let manager = session_manager(storage, settings.provider_timeout_seconds);
            let member = manager
                .sign_in(&email, &password)
                .await
                .map_err(|err| anyhow!("{err}"))?;
            println!("signed in member {} ({})", member.member_id, member.email);
        }
        Command::CreateListing {
            provider_email,
            title,
            description,
            category,
            price_min,
            price_max,
            price_type,
            location,
        } => {
            let provider = storage
                .member_by_email(&provider_email)
                .await?
                .ok_or_else(|| anyhow!("no member with email '{provider_email}'"))?;
            let price_type = if price_type.eq_ignore_ascii_case("hourly") {
                PriceType::Hourly
            } else if price_type.eq_ignore_ascii_case("negotiable") {
                PriceType::Negotiable
            } else {
                PriceType::Fixed
            };
            let listing = storage
                .create_listing(NewListing {
                    provider_id: provider.member_id,
                    title,
                    description,
                    category,
                    price_min,
                    price_max,
                    price_type,
                    location,
                })
                .await?;
            println!("created listing {}", listing.listing_id);
        }
        Command::Browse { search, category } => {
            let catalog = ListingCatalog::new(Arc::new(storage));
            let listings = catalog
                .fetch_active_listings()
                .await
                .map_err(|err| anyhow!("{err}"))?;
            let query = ListingQuery {
                search_text: search,
                category: if category == "all" {
                    CategoryFilter::All
                } else {
                    CategoryFilter::named(category)
                },
            };
            let matches = filter_listings(&listings, &query);
            println!("categories: {}", categories_of(&listings).join(", "));
            for row in &matches {
                println!(
                    "{} | {} | {} | by {}",
                    row.listing.listing_id,
                    row.listing.title,
                    format_price(&row.listing),
                    row.provider.full_name
                );
            }
            println!("{} of {} listings matched", matches.len(), listings.len());
        }
        Command::Show { listing_id } => {
            let catalog = ListingCatalog::new(Arc::new(storage));
            match catalog
                .fetch_listing(&ListingId(listing_id))
                .await
                .map_err(|err| anyhow!("{err}"))?
            {
                Some(row) => {
                    println!("{} ({})", row.listing.title, row.listing.category);
                    println!("{}", row.listing.description);
                    println!("price: {}", format_price(&row.listing));
                    println!("provider: {} <{}>", row.provider.full_name, row.provider.email);
                    if let Some(location) = &row.listing.location {
                        println!("location: {location}");
                    }
                }
                None => println!("listing not found"),
            }
        }
        Command::RemoveMember { email } => {
            let member = storage
                .member_by_email(&email)
                .await?
                .ok_or_else(|| anyhow!("no member with email '{email}'"))?;
            storage.delete_member(&member.member_id).await?;
            println!(
                "removed member {}; their listings are now inactive",
                member.member_id
            );
        }
    }

    Ok(())
}

fn session_manager(
    storage: Storage,
    provider_timeout_seconds: u64,
) -> SessionManager<DurableIdentityProvider> {
    SessionManager::with_provider_timeout(
        Arc::new(DurableIdentityProvider::with_store(storage)),
        Duration::from_secs(provider_timeout_seconds),
    )
}
