//! Command-line client for the commerce API.
//!
//! Usage:
//!     shopflow search "lamp" --sort price
//!     shopflow products --category home --max-price 50
//!     shopflow --user 1 recommend --kinds cf_user,seasonal --season winter
//!     shopflow --user 1 cart add P1 --quantity 2
//!     shopflow reviews add SKU-1 --rating 4 --comment "ok"
//!     shopflow add-product SKU-9 --name Lamp --category home --price 19.5
//!     shopflow health

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use shopflow_aggregate::{RecommendationAggregator, SectionStatus};
use shopflow_backend_http::{ApiConfig, CatalogBackend, HttpBackend, ListBackend, NewAccount};
use shopflow_coordinator::CoordinatorConfig;
use shopflow_model::{
    FilterCriteria, FilterEdit, LoginOutcome, NewProduct, Product, ProductId, ProviderKind,
    RecommendationRequest, ReviewSummary, SearchMode, SearchQuery, SortKey, MIN_QUERY_LEN,
};
use shopflow_state::{
    CartWishlistStateStore, FilterStateStore, ListKind, ListStatus, ListsView, ReviewPanel,
    SearchBox,
};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "shopflow")]
#[command(about = "Browse, search and shop against the commerce API")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// API base URL (overrides SHOPFLOW_API_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Request timeout in seconds (overrides SHOPFLOW_TIMEOUT_SECS)
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,

    /// Acting user id
    #[arg(short, long, global = true)]
    user: Option<String>,

    /// Bearer token from a previous login
    #[arg(long, global = true)]
    token: Option<String>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Args)]
struct FilterArgs {
    #[arg(long)]
    category: Option<String>,

    #[arg(long)]
    brand: Option<String>,

    #[arg(long)]
    min_price: Option<f64>,

    #[arg(long)]
    max_price: Option<f64>,

    /// Sort key (name, price, rating, score)
    #[arg(long)]
    sort: Option<String>,
}

impl FilterArgs {
    fn criteria(&self, default_sort: SortKey) -> FilterCriteria {
        let sort = self.sort.as_deref().map_or(default_sort, SortKey::from);
        [
            FilterEdit::Category(self.category.clone()),
            FilterEdit::Brand(self.brand.clone()),
            FilterEdit::MinPrice(self.min_price),
            FilterEdit::MaxPrice(self.max_price),
            FilterEdit::Sort(sort),
        ]
        .into_iter()
        .fold(FilterCriteria::default(), |criteria, edit| criteria.apply(edit))
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Search products by text
    Search {
        /// Text to search for
        query: String,

        /// Use the full-text index (results ordered by relevance)
        #[arg(long)]
        fulltext: bool,

        #[command(flatten)]
        filters: FilterArgs,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List the catalog
    Products {
        #[command(flatten)]
        filters: FilterArgs,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Fetch recommendation sections
    Recommend {
        /// Provider kinds, comma-separated (default: every kind with a subject)
        #[arg(short, long)]
        kinds: Option<String>,

        /// Product id for item_similar
        #[arg(long)]
        product: Option<String>,

        /// Season for seasonal
        #[arg(long)]
        season: Option<String>,

        /// Maximum results for collaborative filtering
        #[arg(short, long)]
        limit: Option<u32>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show or edit the cart
    Cart {
        #[command(subcommand)]
        action: Option<ListAction>,
    },

    /// Show or edit the wishlist
    Wishlist {
        #[command(subcommand)]
        action: Option<ListAction>,
    },

    /// Place an order for the cart
    Checkout,

    /// Product reviews
    Reviews {
        #[command(subcommand)]
        action: ReviewAction,
    },

    /// Browsing history, newest first
    History,

    /// Log in and print the bearer token
    Login {
        #[arg(long)]
        email: String,

        #[arg(long)]
        password: String,

        /// Authenticator code, when the account has 2FA enabled
        #[arg(long)]
        code: Option<String>,
    },

    /// Create an account
    Register {
        #[arg(long)]
        email: String,

        #[arg(long)]
        password: String,

        #[arg(long, default_value = "")]
        full_name: String,

        #[arg(long)]
        phone: Option<String>,
    },

    /// Confirm an address with the token from the verification mail
    VerifyEmail {
        token: String,
    },

    /// Enable 2FA and print the authenticator URI (needs --token)
    SetupTwoFactor,

    /// Show the logged-in profile (needs --token)
    Profile,

    /// Show another account by id (needs --token)
    User {
        id: String,
    },

    /// Add a product to the catalog
    AddProduct {
        sku: String,

        #[arg(long)]
        name: String,

        #[arg(long)]
        category: String,

        #[arg(long)]
        price: f64,

        #[arg(long)]
        brand: Option<String>,

        #[arg(long)]
        description: Option<String>,
    },

    /// Check backend health
    Health,
}

#[derive(Subcommand)]
enum ListAction {
    Show,
    Add {
        product: String,

        #[arg(short, long)]
        quantity: Option<u32>,
    },
    Remove {
        product: String,
    },
}

#[derive(Subcommand)]
enum ReviewAction {
    Show {
        sku: String,
    },
    Add {
        sku: String,

        /// 1 to 5
        #[arg(short, long)]
        rating: Option<u8>,

        #[arg(short, long, default_value = "")]
        comment: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "shopflow=debug" } else { "shopflow=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = ApiConfig::from_env()?;
    if let Some(url) = cli.api_url {
        config.base_url = url;
    }
    if let Some(secs) = cli.timeout_secs {
        config.timeout_secs = secs;
    }
    let coordinator =
        CoordinatorConfig::immediate().with_timeout(Duration::from_secs(config.timeout_secs));

    let backend = HttpBackend::new(config)?;
    if let Some(token) = &cli.token {
        backend.session().set(token.as_str());
    }

    let user = cli.user;
    let require_user = || user.clone().context("--user is required for this command");

    match cli.command {
        Commands::Search {
            query,
            fulltext,
            filters,
            format,
        } => {
            let (mode, sort) = if fulltext {
                (SearchMode::Fulltext, SortKey::Score)
            } else {
                (SearchMode::Catalog, SortKey::Name)
            };
            let query = SearchQuery::new(query)
                .with_filters(filters.criteria(sort))
                .with_mode(mode);
            run_search(backend, coordinator, query, &format).await?;
        }
        Commands::Products { filters, format } => {
            run_products(backend, coordinator, filters.criteria(SortKey::Name), &format).await?;
        }
        Commands::Recommend {
            kinds,
            product,
            season,
            limit,
            format,
        } => {
            let requests = recommendation_requests(kinds, user.as_deref(), product, season, limit)?;
            run_recommend(backend, coordinator, &requests, &format).await?;
        }
        Commands::Cart { action } => {
            run_list(backend, coordinator, require_user()?, ListKind::Cart, action).await?;
        }
        Commands::Wishlist { action } => {
            run_list(backend, coordinator, require_user()?, ListKind::Wishlist, action).await?;
        }
        Commands::Checkout => {
            run_checkout(backend, coordinator, require_user()?).await?;
        }
        Commands::Reviews { action } => {
            run_reviews(backend, coordinator, action).await?;
        }
        Commands::History => {
            run_history(&backend, &require_user()?).await?;
        }
        Commands::Login {
            email,
            password,
            code,
        } => {
            run_login(&backend, &email, &password, code).await?;
        }
        Commands::Register {
            email,
            password,
            full_name,
            phone,
        } => {
            let account = NewAccount {
                email,
                password,
                full_name,
                phone,
            };
            let user_id = backend.register(&account).await?;
            println!("Registered user {user_id}; check your inbox to verify the address");
        }
        Commands::VerifyEmail { token } => {
            backend.verify_email(&token).await?;
            println!("Email verified");
        }
        Commands::SetupTwoFactor => {
            let setup = backend.setup_two_factor().await?;
            println!("{}", setup.otp_uri);
        }
        Commands::Profile => {
            let profile = backend.profile().await?;
            println!("{}", serde_json::to_string_pretty(&profile)?);
        }
        Commands::User { id } => {
            let profile = backend.user(&id).await?;
            println!("{}", serde_json::to_string_pretty(&profile)?);
        }
        Commands::AddProduct {
            sku,
            name,
            category,
            price,
            brand,
            description,
        } => {
            let product = NewProduct {
                sku,
                name,
                category,
                price,
                brand,
                description,
            };
            backend.create_product(&product).await?;
            println!("Created {}", product.sku);
        }
        Commands::Health => {
            run_health(&backend).await?;
        }
    }

    Ok(())
}

fn print_products(products: &[Product], format: &str) -> Result<()> {
    if format == "json" {
        println!("{}", serde_json::to_string_pretty(products)?);
        return Ok(());
    }

    for (i, product) in products.iter().enumerate() {
        println!("\n{}. {} ({})", i + 1, product.name, product.id.as_str());
        let price = product
            .price
            .map_or_else(|| "-".to_string(), |price| format!("{price:.2}"));
        let category = if product.category.is_empty() {
            "-"
        } else {
            product.category.as_str()
        };
        println!("   Category: {category} | Price: {price}");
        if let Some(rating) = product.rating {
            println!("   Rating: {rating:.1}");
        }
        if let Some(score) = product.ranking.score() {
            println!("   Score: {score:.3}");
        } else if let Some(weight) = product.ranking.weight() {
            println!("   Weight: {weight:.2}");
        }
    }

    println!("\n---");
    println!("Total: {} results", products.len());
    Ok(())
}

async fn run_search(
    backend: HttpBackend,
    config: CoordinatorConfig,
    query: SearchQuery,
    format: &str,
) -> Result<()> {
    let search = SearchBox::new(backend, config);
    let view = search.input(query).await;

    match view.status {
        ListStatus::Idle => {
            println!("Type at least {MIN_QUERY_LEN} characters to search");
            Ok(())
        }
        ListStatus::Error => bail!("search failed: {}", view.error.unwrap_or_default()),
        _ => print_products(&view.results, format),
    }
}

async fn run_products(
    backend: HttpBackend,
    config: CoordinatorConfig,
    filters: FilterCriteria,
    format: &str,
) -> Result<()> {
    let store = FilterStateStore::new(backend, config);
    store.set_filters(filters).await?;

    let view = store.view();
    if view.status == ListStatus::Error {
        bail!("product list failed: {}", view.error.unwrap_or_default());
    }
    print_products(&view.products, format)
}

fn recommendation_requests(
    kinds: Option<String>,
    user: Option<&str>,
    product: Option<String>,
    season: Option<String>,
    limit: Option<u32>,
) -> Result<Vec<RecommendationRequest>> {
    let explicit = kinds.is_some();
    let kinds: Vec<ProviderKind> = match kinds {
        Some(list) => list
            .split(',')
            .map(|kind| kind.trim().parse())
            .collect::<Result<_, _>>()?,
        None => ProviderKind::ALL.to_vec(),
    };

    let mut requests = Vec::new();
    for kind in kinds {
        let subject = match kind {
            ProviderKind::ItemSimilar => product.clone(),
            ProviderKind::Seasonal => Some(season.clone().unwrap_or_default()),
            ProviderKind::Manual => Some(String::new()),
            _ => user.map(str::to_string),
        };
        match subject {
            Some(subject) => requests.push(RecommendationRequest::for_kind(kind, subject, limit)),
            None if explicit => bail!("{kind} needs a subject (--user or --product)"),
            None => tracing::debug!(provider = %kind, "Skipping provider without a subject"),
        }
    }
    Ok(requests)
}

async fn run_recommend(
    backend: HttpBackend,
    config: CoordinatorConfig,
    requests: &[RecommendationRequest],
    format: &str,
) -> Result<()> {
    let aggregator = RecommendationAggregator::new(backend, config);
    let sections = aggregator.aggregate(requests).await;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&sections)?);
        return Ok(());
    }

    for (kind, section) in &sections {
        println!("\n== {} ==", kind.label());
        match section.status {
            SectionStatus::Error => {
                println!("   unavailable: {}", section.error.as_deref().unwrap_or("unknown error"));
            }
            _ if section.items.is_empty() => println!("   (nothing to show)"),
            _ => {
                for item in &section.items {
                    let price = item.price.map(|p| format!(" {p:.2}")).unwrap_or_default();
                    println!("   - {} ({}){price}", item.name, item.id.as_str());
                }
            }
        }
    }
    Ok(())
}

fn print_lists(view: &ListsView, list: ListKind) {
    match list {
        ListKind::Cart => {
            for line in &view.cart {
                let name = line.name.as_deref().unwrap_or(line.product.as_str());
                let subtotal = line
                    .subtotal()
                    .map(|total| format!("  {total:.2}"))
                    .unwrap_or_default();
                println!("{name} x{}{subtotal}", line.quantity);
            }
            let total: f64 = view.cart.iter().filter_map(|line| line.subtotal()).sum();
            println!("---");
            println!("{} lines, total {total:.2}", view.cart.len());
        }
        ListKind::Wishlist => {
            for item in &view.wishlist {
                println!("{}", item.product.as_str());
            }
            println!("---");
            println!("{} items", view.wishlist.len());
        }
    }
}

async fn run_list(
    backend: HttpBackend,
    config: CoordinatorConfig,
    user: String,
    list: ListKind,
    action: Option<ListAction>,
) -> Result<()> {
    let store = CartWishlistStateStore::with_config(backend, user, config);
    store.load().await?;

    match action.unwrap_or(ListAction::Show) {
        ListAction::Show => {}
        ListAction::Add { product, quantity } => {
            store.add_item(list, ProductId::id(product), quantity).await?;
        }
        ListAction::Remove { product } => {
            store.remove_item(list, &ProductId::id(product)).await?;
        }
    }

    print_lists(&store.view(), list);
    Ok(())
}

async fn run_checkout(backend: HttpBackend, config: CoordinatorConfig, user: String) -> Result<()> {
    let store = CartWishlistStateStore::with_config(backend, user, config);
    store.load().await?;
    store.checkout().await?;
    println!("Order placed");
    Ok(())
}

fn print_reviews(sku: &str, summary: Option<ReviewSummary>) {
    let Some(summary) = summary else {
        println!("{sku}: superseded by a newer load");
        return;
    };
    match summary.average_rating {
        Some(average) => {
            println!("{sku}: {average:.1} / 5 from {} reviews", summary.reviews.len())
        }
        None => println!("{sku}: no reviews yet"),
    }
    for review in &summary.reviews {
        let date = review.date.as_deref().unwrap_or("-");
        println!("   [{}] {} ({date})", review.rating, review.comment);
    }
}

async fn run_reviews(
    backend: HttpBackend,
    config: CoordinatorConfig,
    action: ReviewAction,
) -> Result<()> {
    let panel = ReviewPanel::new(backend, config);
    match action {
        ReviewAction::Show { sku } => {
            let summary = panel.load(&sku).await?;
            print_reviews(&sku, summary);
        }
        ReviewAction::Add {
            sku,
            rating,
            comment,
        } => {
            let summary = panel.submit(&sku, rating, &comment).await?;
            print_reviews(&sku, summary);
        }
    }
    Ok(())
}

async fn run_history(backend: &HttpBackend, user: &str) -> Result<()> {
    let events = backend.history(user).await?;
    for event in &events {
        let when = event.timestamp.as_deref().unwrap_or("-");
        println!("{when}  {:<16} {}", event.action.endpoint(), event.product.as_str());
    }
    println!("---");
    println!("{} events", events.len());
    Ok(())
}

async fn run_login(
    backend: &HttpBackend,
    email: &str,
    password: &str,
    code: Option<String>,
) -> Result<()> {
    let token = match backend.login(email, password).await? {
        LoginOutcome::Authenticated { access_token } => access_token,
        LoginOutcome::TwoFactor { pending_token } => {
            let code = code.context("account has 2FA enabled; rerun with --code")?;
            backend.verify_two_factor(&pending_token, &code).await?
        }
    };
    println!("{token}");
    Ok(())
}

async fn run_health(backend: &HttpBackend) -> Result<()> {
    print!("Checking {} backend... ", backend.name());

    match backend.health_check().await {
        Ok(()) => {
            println!("OK");
            Ok(())
        }
        Err(e) => {
            println!("FAILED: {}", e);
            std::process::exit(1);
        }
    }
}
