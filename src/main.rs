use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pfs_locality::compare::{self, ClaimAmounts, parse_amount};
use pfs_locality::dataset::source_for_location;
use pfs_locality::{
    Config, FeeScheduleRequest, LocalityMatch, LocalityResolver, PfsClient, ResolveError,
    describe_zip,
};

/// Map a US location to its CMS Physician Fee Schedule locality
#[derive(Parser, Debug)]
#[command(name = "pfs-locality", version)]
struct Args {
    /// Locality mapping file or URL (overrides LOCALITY_DATA)
    #[arg(long, global = true)]
    data: Option<String>,

    /// Fee schedule API base (overrides PFS_API_BASE)
    #[arg(long, global = true)]
    api_base: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve a ZIP code, county, city or state to a locality
    Resolve {
        /// e.g. 90210, "Cook County, IL", Alaska
        location: String,
    },
    /// Price an HCPCS code in the locality for a location
    Price {
        location: String,
        hcpcs_code: String,
        /// Amount you were billed
        #[arg(long)]
        bill: Option<String>,
        /// Allowed amount shown on the claim
        #[arg(long)]
        allowed: Option<String>,
        /// Print every returned fee schedule row as CSV
        #[arg(long)]
        csv: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let mut config = Config::from_env();
    if let Some(data) = args.data {
        config.dataset = data;
    }
    if let Some(base) = args.api_base {
        config.pfs_api_base = base.trim_end_matches('/').to_string();
    }

    let pfs = PfsClient::with_base(&config.pfs_api_base)?;
    let resolver =
        LocalityResolver::from_boxed(source_for_location(pfs.http_client(), &config.dataset));

    match args.command {
        Command::Resolve { location } => {
            let locality = resolve_or_exit(&resolver, &location).await;
            print_locality(&locality);
        }
        Command::Price {
            location,
            hcpcs_code,
            bill,
            allowed,
            csv,
        } => {
            let locality = resolve_or_exit(&resolver, &location).await;
            print_locality(&locality);

            let request = FeeScheduleRequest {
                hcpcs_code,
                mac: locality.locality.mac.clone(),
                locality_number: locality.locality.locality_number.clone(),
                year_key: None,
                include_all_macs: csv,
            };
            let schedule = match pfs.fetch_fee_schedule(&request).await {
                Ok(schedule) => schedule,
                Err(e) => {
                    eprintln!("Error: {:#}", e);
                    std::process::exit(1);
                }
            };

            if csv {
                print!("{}", schedule.csv);
                return Ok(());
            }

            let locality_code = locality.locality_code();
            let Some(row) = compare::select_row(
                &schedule.rows,
                schedule.matching_row.as_ref(),
                locality_code.as_deref(),
            ) else {
                eprintln!("No Medicare pricing found for this code.");
                std::process::exit(1);
            };

            let amounts = ClaimAmounts {
                current_bill: bill.as_deref().and_then(parse_amount),
                allowed_amount: allowed.as_deref().and_then(parse_amount),
            };
            match compare::compare(row, &locality, amounts) {
                Ok(comparison) => {
                    println!();
                    println!("{} ({})", row.code_title(&request.hcpcs_code), schedule.year);
                    for line in &comparison.lines {
                        println!("  {:<45} {:>12} {:>8}", line.label, line.amount, line.percent);
                    }
                    println!("{}", comparison.recommendation);
                }
                Err(message) => {
                    eprintln!("{}", message);
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}

async fn resolve_or_exit(resolver: &LocalityResolver, location: &str) -> LocalityMatch {
    match resolver.resolve(location).await {
        Ok(locality) => locality,
        Err(ResolveError::Unresolved(failure)) => {
            eprintln!("{}: {}", failure.reason, failure.message);
            std::process::exit(1);
        }
        Err(ResolveError::Load(e)) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn print_locality(locality: &LocalityMatch) {
    println!("{}", locality.title());
    println!("{}", locality.detail());
    if let Some(counties) = locality.counties_included() {
        println!("Counties included: {}", counties);
    }
    if let Some(code) = locality.locality_code() {
        println!("Locality code: {}", code);
    }
    if let pfs_locality::MatchVia::Zip { zip, .. } = &locality.via {
        println!("ZIP: {}", describe_zip(zip));
    }
    println!("{}", locality.via.message());
}
