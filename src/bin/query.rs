use anyhow::Result;
use clap::{Parser, Subcommand};
use nft_indexer::query::commands::{
    TransferQuery, cmd_contracts, cmd_holdings, cmd_owners, cmd_stats, cmd_transfers,
};
use nft_indexer::query::formatters::OutputFormat;
use nft_indexer::repository::Database;

#[derive(Parser)]
#[command(name = "query")]
#[command(about = "Query indexed NFT ownership and transfer data", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "table")]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List known NFT contracts
    Contracts,
    /// Current holders of one token (`<contract>-<token id>`)
    Owners {
        nft_id: String,
    },
    /// Tokens held by an address
    Holdings {
        owner: String,
    },
    Transfers {
        #[arg(long)]
        nft: Option<String>,

        #[arg(long)]
        from: Option<String>,

        #[arg(long)]
        to: Option<String>,

        #[arg(long, num_args = 2, value_names = ["START", "END"])]
        block_range: Option<Vec<u64>>,

        #[arg(long, default_value = "100")]
        limit: usize,

        #[arg(long, default_value = "0")]
        offset: usize,
    },
    Stats,
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    let format = OutputFormat::from(cli.format.as_str());

    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:./indexer.db".to_string());
    let db = Database::new(&database_url)?;
    let conn = db.conn();

    let output = match cli.command {
        Commands::Contracts => cmd_contracts(&conn, &format)?,
        Commands::Owners { nft_id } => cmd_owners(&conn, &nft_id, &format)?,
        Commands::Holdings { owner } => cmd_holdings(&conn, &owner, &format)?,
        Commands::Transfers {
            nft,
            from,
            to,
            block_range,
            limit,
            offset,
        } => {
            let block_range = block_range.and_then(|v| match v.as_slice() {
                [start, end] => Some((*start, *end)),
                _ => None,
            });
            let query = TransferQuery {
                nft,
                from,
                to,
                block_range,
                limit,
                offset,
            };
            cmd_transfers(&conn, query, &format)?
        }
        Commands::Stats => cmd_stats(&conn, &format)?,
    };

    println!("{output}");
    Ok(())
}
