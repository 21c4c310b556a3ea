// src/main.rs
use anyhow::{anyhow, Context};
use arcade_aa::account::WalletSigner;
use arcade_aa::config::{parse_quantity, ChainArgs, ChainConfig, SettingsArgs};
use arcade_aa::operations::NewTournament;
use arcade_aa::{Arcade, GasPayment, OperationOptions, PaymentType};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use ethers::types::{Address, U256};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[clap(author, version, about = "Arcade smart-account operations", long_about = None)]
struct Args {
    /// Owner key of the smart account.
    #[clap(short, long, env = "ARCADE_PRIVATE_KEY", hide_env_values = true)]
    private_key: String,

    #[clap(flatten)]
    chain: ChainArgs,

    #[clap(flatten)]
    settings: SettingsArgs,

    /// 0 = sponsored, 1 = prepay, 2 = postpay.
    #[clap(long, global = true, default_value_t = 0)]
    payment_type: u8,

    /// ERC-20 used to pay gas when the payment type is not sponsored.
    #[clap(long, global = true)]
    token: Option<Address>,

    #[clap(long, global = true)]
    gas_multiplier: Option<f64>,

    /// Paymaster API key for this call, overriding the configured one.
    #[clap(long, global = true)]
    api_key: Option<String>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the smart-account address owned by the key.
    WalletAddress,
    /// List the tokens the paymaster accepts for gas.
    Tokens,
    /// Native and gas-token balances of the smart account.
    Balances,
    GasPrice,
    /// Let the paymaster spend a gas token (sponsored).
    ApproveToken {
        #[clap(value_name = "TOKEN")]
        erc20: Address,
        #[clap(long, value_parser = parse_quantity, default_value = "1")]
        required: U256,
    },
    MintNft {
        uri: String,
        /// Defaults to the smart account.
        #[clap(long)]
        to: Option<Address>,
    },
    MintToken {
        #[clap(value_parser = parse_quantity)]
        amount: U256,
        #[clap(long)]
        to: Option<Address>,
    },
    TransferToken {
        to: Address,
        #[clap(value_parser = parse_quantity)]
        amount: U256,
        /// Defaults to the arcade token.
        #[clap(long = "contract")]
        contract: Option<Address>,
    },
    SubmitGame {
        title: String,
        description: String,
        game_url: String,
        thumbnail_url: String,
    },
    ClaimTokens {
        #[clap(value_parser = parse_quantity)]
        amount: U256,
    },
    SubmitPointsClaim {
        #[clap(value_parser = parse_quantity)]
        points: U256,
    },
    ApprovePointsClaim {
        #[clap(value_parser = parse_quantity)]
        claim_id: U256,
    },
    RejectPointsClaim {
        #[clap(value_parser = parse_quantity)]
        claim_id: U256,
        reason: String,
    },
    ApplyForAdmin {
        reason: String,
    },
    Stake {
        #[clap(value_parser = parse_quantity)]
        amount: U256,
    },
    Unstake {
        #[clap(value_parser = parse_quantity)]
        amount: U256,
    },
    CreateTournament {
        name: String,
        #[clap(long, value_parser = parse_quantity)]
        entry_fee: U256,
        #[clap(long, value_parser = parse_quantity)]
        max_participants: U256,
        #[clap(long, value_parser = parse_quantity)]
        start_time: U256,
        #[clap(long, value_parser = parse_quantity)]
        end_time: U256,
        #[clap(long, value_parser = parse_quantity)]
        game_id: U256,
    },
    JoinTournament {
        #[clap(value_parser = parse_quantity)]
        tournament_id: U256,
        #[clap(long, value_parser = parse_quantity, default_value = "0")]
        entry_fee: U256,
    },
    EndTournament {
        #[clap(value_parser = parse_quantity)]
        tournament_id: U256,
        #[clap(required = true)]
        winners: Vec<Address>,
    },
    FinalizeTournament {
        #[clap(value_parser = parse_quantity)]
        tournament_id: U256,
    },
    /// NFT supply, plus owner and URI of one token when given.
    NftInfo {
        #[clap(value_parser = parse_quantity)]
        token_id: Option<U256>,
    },
    TournamentInfo {
        #[clap(value_parser = parse_quantity)]
        tournament_id: U256,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    // Logs go to stderr so stdout stays machine-readable
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Flags first, then the matching ARCADE_* variables
    let args = Args::parse();
    let config = ChainConfig::try_from(args.chain.clone()).context("loading network configuration")?;
    let arcade = Arcade::new(config, args.settings.clone().into())?;

    let signer = arcade.signer(&args.private_key)?;
    info!("Using owner {:?}", signer.address());

    run(&arcade, &signer, &args).await
}

fn gas_payment(args: &Args) -> anyhow::Result<GasPayment> {
    let mut options = OperationOptions::default();
    if let Some(api_key) = &args.api_key {
        options = options.with_api_key(api_key.clone());
    }
    if let Some(multiplier) = args.gas_multiplier {
        options = options.with_gas_multiplier(multiplier);
    }
    Ok(GasPayment {
        payment: PaymentType::try_from(args.payment_type)?,
        token: args.token,
        options,
    })
}

/// Token-paid gas needs a paymaster allowance first.
async fn prepare_gas(arcade: &Arcade, signer: &WalletSigner, gas: &GasPayment) -> anyhow::Result<()> {
    if let (false, Some(token)) = (gas.payment.is_sponsored(), gas.token) {
        if let Some(approval) = arcade
            .tokens
            .ensure_approved(signer, token, U256::one(), &gas.options)
            .await?
        {
            info!("Approved {:?} for gas in {:?}", token, approval.user_op_hash);
        }
    }
    Ok(())
}

fn print<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(arcade: &Arcade, signer: &WalletSigner, args: &Args) -> anyhow::Result<()> {
    let gas = gas_payment(args)?;

    match &args.command {
        Command::WalletAddress => print(&arcade.connections.wallet_address(signer).await?),
        Command::Tokens => print(&arcade.tokens.supported_tokens(signer).await?),
        Command::Balances => print(&arcade.tokens.load_balances(signer).await?),
        Command::GasPrice => print(&arcade.tokens.gas_price().await?),
        Command::ApproveToken { erc20, required } => {
            let approval = arcade
                .tokens
                .ensure_approved(signer, *erc20, *required, &gas.options)
                .await?;
            match approval {
                Some(result) => print(&result),
                None => {
                    info!("Allowance for {:?} already sufficient", erc20);
                    print(&arcade.tokens.allowance(signer, *erc20).await?)
                }
            }
        }
        Command::NftInfo { token_id } => {
            let total_supply = arcade.queries.nft_total_supply().await?;
            let token = match token_id {
                Some(id) => Some(serde_json::json!({
                    "tokenId": id,
                    "owner": arcade.queries.nft_owner_of(*id).await?,
                    "tokenUri": arcade.queries.nft_token_uri(*id).await?,
                })),
                None => None,
            };
            print(&serde_json::json!({ "totalSupply": total_supply, "token": token }))
        }
        Command::TournamentInfo { tournament_id } => {
            let (participants, prize_pool) = tokio::try_join!(
                arcade.queries.tournament_participants(*tournament_id),
                arcade.queries.tournament_prize_pool(*tournament_id)
            )?;
            print(&serde_json::json!({
                "tournamentId": tournament_id,
                "participants": participants,
                "prizePool": prize_pool,
            }))
        }
        command => {
            prepare_gas(arcade, signer, &gas).await?;
            write(arcade, signer, command, &gas).await
        }
    }
}

async fn write(
    arcade: &Arcade,
    signer: &WalletSigner,
    command: &Command,
    gas: &GasPayment,
) -> anyhow::Result<()> {
    let ops = &arcade.operations;
    match command {
        Command::MintNft { uri, to } => {
            let to = match to {
                Some(to) => *to,
                None => arcade.connections.wallet_address(signer).await?,
            };
            print(&ops.mint_nft(signer, to, uri, gas).await?)
        }
        Command::MintToken { amount, to } => {
            let to = match to {
                Some(to) => *to,
                None => arcade.connections.wallet_address(signer).await?,
            };
            print(&ops.mint_erc20_token(signer, to, *amount, gas).await?)
        }
        Command::TransferToken { to, amount, contract } => {
            let token = contract.unwrap_or(arcade.config.contracts.token);
            print(&ops.transfer_erc20_token(signer, token, *to, *amount, gas).await?)
        }
        Command::SubmitGame {
            title,
            description,
            game_url,
            thumbnail_url,
        } => print(
            &ops.submit_game(signer, title, description, game_url, thumbnail_url, gas)
                .await?,
        ),
        Command::ClaimTokens { amount } => print(&ops.claim_tokens(signer, *amount, gas).await?),
        Command::SubmitPointsClaim { points } => print(&ops.submit_points_claim(signer, *points, gas).await?),
        Command::ApprovePointsClaim { claim_id } => {
            print(&ops.approve_points_claim(signer, *claim_id, gas).await?)
        }
        Command::RejectPointsClaim { claim_id, reason } => {
            print(&ops.reject_points_claim(signer, *claim_id, reason, gas).await?)
        }
        Command::ApplyForAdmin { reason } => print(&ops.apply_for_admin(signer, reason, gas).await?),
        Command::Stake { amount } => print(&ops.stake_tokens(signer, *amount, gas).await?),
        Command::Unstake { amount } => print(&ops.unstake_tokens(signer, *amount, gas).await?),
        Command::CreateTournament {
            name,
            entry_fee,
            max_participants,
            start_time,
            end_time,
            game_id,
        } => {
            let tournament = NewTournament {
                name: name.clone(),
                entry_fee: *entry_fee,
                max_participants: *max_participants,
                start_time: *start_time,
                end_time: *end_time,
                game_id: *game_id,
            };
            print(&ops.create_tournament(signer, &tournament, gas).await?)
        }
        Command::JoinTournament {
            tournament_id,
            entry_fee,
        } => print(&ops.join_tournament(signer, *tournament_id, *entry_fee, gas).await?),
        Command::EndTournament {
            tournament_id,
            winners,
        } => print(
            &ops.end_tournament(signer, *tournament_id, winners.clone(), gas)
                .await?,
        ),
        Command::FinalizeTournament { tournament_id } => {
            print(&ops.finalize_tournament(signer, *tournament_id, gas).await?)
        }
        _ => Err(anyhow!("not a write command")),
    }
}
