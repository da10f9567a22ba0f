use std::env;
use std::io::{self, Write};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::Parser;
use tokio::sync::mpsc;

use tmx_rs::engine::escrow::Party;
use tmx_rs::engine::market::TicketMarket;
use tmx_rs::engine::pricing::PricingTable;
use tmx_rs::engine::timer::{
    spawn_cooldown, CooldownState, EngineSignal, DEFAULT_COOLDOWN_MS,
};
use tmx_rs::engine::types::{
    BuyOffer, ListingId, MarketEvent, Receipt, ResaleListing, TicketBag, Tier,
};
use tmx_rs::persist::postgres::{PostgresSnapshotStore, PostgresWalStore};
use tmx_rs::persist::{snapshot, SnapshotStore, WalOp, WalStore};
use tmx_rs::telemetry;

/// Box-office front end for the two-phase ticket market engine.
#[derive(Parser)]
#[command(name = "tmx", about = "Two-phase ticket market box office")]
struct Opts {
    /// Event name used to key snapshots and the WAL (default: TMX_EVENT or "main-stage")
    #[arg(long)]
    event: Option<String>,

    /// Cooldown between sellout and resale, in milliseconds
    #[arg(long, default_value_t = DEFAULT_COOLDOWN_MS)]
    cooldown_ms: u64,

    /// Run purely in memory, even if DATABASE_URL is set
    #[arg(long)]
    no_persist: bool,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// The three-row house from the standard configuration.
fn default_tiers() -> Vec<Tier> {
    vec![
        Tier { name: "front".into(), unit_price: 3, capacity: 3 },
        Tier { name: "middle".into(), unit_price: 2, capacity: 5 },
        Tier { name: "back".into(), unit_price: 1, capacity: 10 },
    ]
}

fn load_tiers() -> anyhow::Result<Vec<Tier>> {
    match env::var("TMX_TIERS") {
        Ok(json) => Ok(serde_json::from_str(&json)?),
        Err(_) => Ok(default_tiers()),
    }
}

/// "front 3 back 2" -> bag with those quantities.
fn parse_bag(parts: &[&str]) -> Option<TicketBag> {
    if parts.is_empty() || parts.len() % 2 != 0 {
        return None;
    }
    let mut bag = TicketBag::new();
    for pair in parts.chunks(2) {
        let qty: u32 = pair[1].parse().ok()?;
        bag.add(pair[0], qty);
    }
    Some(bag)
}

fn read_line(prompt: &str) -> anyhow::Result<String> {
    println!("{}", prompt);
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

fn print_receipt(receipt: &Receipt) {
    for event in &receipt.events {
        println!("  Event: {:?}", event);
    }
}

fn print_stock(market: &TicketMarket) {
    println!("\n=== Stock ===");
    for (tier, sold, capacity) in market.inventory().iter() {
        println!("  {:<10} sold {}/{}", tier, sold, capacity);
    }
    println!(
        "Sold out: {} | State: {:?} | Cooldown: {:?}",
        market.inventory().is_fully_sold_out(),
        market.state(),
        market.cooldown().state(),
    );
    println!("=============\n");
}

async fn append_wal(store: &mut Option<PostgresWalStore>, op: WalOp) {
    if let Some(store) = store.as_mut() {
        if let Err(e) = store.append_op(&op).await {
            eprintln!("Error appending to WAL: {:?}", e);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok(); // load .env
    telemetry::init_tracing("info");
    telemetry::init_metrics();

    let opts = Opts::parse();
    let event = opts
        .event
        .or_else(|| env::var("TMX_EVENT").ok())
        .unwrap_or_else(|| "main-stage".to_string());

    // Build stores (both share the same database)
    let mut snap_store = None;
    let mut wal_store = None;
    if !opts.no_persist {
        if let Ok(db_url) = env::var("DATABASE_URL") {
            snap_store = Some(PostgresSnapshotStore::new(&db_url, &event).await?);
            wal_store = Some(PostgresWalStore::new(&db_url, &event).await?);
        }
    }

    // 1) Restore the latest snapshot (if any), then 2) replay the WAL tail
    let mut market = None;
    if let (Some(snaps), Some(wal)) = (&snap_store, &wal_store) {
        if let Some(snap) = snaps.load_snapshot(&event).await? {
            let mut restored = snapshot::to_market(&snap)?;
            let ops = wal.relay_ops(snap.wal_high_watermark).await?;
            let replayed = ops.len();
            for (_id, op) in &ops {
                snapshot::apply_op(&mut restored, op)?;
            }
            println!(
                "Restored {} from snapshot and replayed {} WAL operations",
                event, replayed
            );
            market = Some(restored);
        }
    }
    let mut market = match market {
        Some(m) => m,
        None => {
            println!("No snapshot found, opening a fresh market for {}", event);
            TicketMarket::new(PricingTable::new(load_tiers()?)?, opts.cooldown_ms)
        }
    };

    let (tx, mut rx) = mpsc::channel::<EngineSignal>(8);

    // A restored market may still be mid-cooldown; schedule the rest of it
    if let CooldownState::Armed { armed_at } = market.cooldown().state() {
        let elapsed = now_ms().saturating_sub(armed_at);
        let remaining = market.cooldown().delay_ms().saturating_sub(elapsed);
        println!("Cooldown in progress, {} ms remaining", remaining);
        spawn_cooldown(Duration::from_millis(remaining), tx.clone());
    }

    // CLI loop
    loop {
        // consume any cooldown wakeup before the next command
        while let Ok(signal) = rx.try_recv() {
            match signal {
                EngineSignal::CooldownElapsed => {
                    let receipt = market.cooldown_elapsed();
                    if !receipt.events.is_empty() {
                        println!("\n*** Cooldown elapsed, resale market is open ***");
                        print_receipt(&receipt);
                        append_wal(&mut wal_store, WalOp::CooldownElapsed).await;
                    }
                }
            }
        }

        print!("\nTMX box office> ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        let command = input.trim().to_lowercase();

        match command.as_str() {
            "help" | "h" => {
                println!("Available commands:");
                println!("  buy       - Buy tickets on the primary market");
                println!("  list      - List escrowed tickets for resale");
                println!("  accept    - Accept an open resale listing");
                println!("  listings  - Show the resale listing book");
                println!("  price     - Show the pricing table");
                println!("  stock     - Show remaining inventory and sale state");
                println!("  holdings  - Show a party's escrowed holding");
                println!("  payout    - Pay out a party's escrowed funds");
                println!("  snapshot  - Save a snapshot");
                println!("  quit, q   - Exit");
            }
            "buy" => {
                let line = read_line("Enter buyer id, payment, and tier/qty pairs (e.g., '1 9 front 3'):")?;
                let parts: Vec<&str> = line.split_whitespace().collect();
                if parts.len() < 4 {
                    println!("Usage: buyer payment tier qty [tier qty ...]");
                    continue;
                }
                let (Ok(buyer), Ok(payment)) = (parts[0].parse::<u64>(), parts[1].parse::<u64>())
                else {
                    println!("Invalid numbers");
                    continue;
                };
                let Some(bag) = parse_bag(&parts[2..]) else {
                    println!("Invalid tier/qty pairs");
                    continue;
                };
                let offer = BuyOffer { requested: bag.clone(), offered_payment: payment };
                let at_ms = now_ms();
                match market.buy(buyer, &offer, at_ms) {
                    Ok(receipt) => {
                        println!("Sold {} to buyer {}", bag, buyer);
                        print_receipt(&receipt);
                        if receipt
                            .events
                            .iter()
                            .any(|e| matches!(e, MarketEvent::CooldownArmed { .. }))
                        {
                            spawn_cooldown(
                                Duration::from_millis(market.cooldown().delay_ms()),
                                tx.clone(),
                            );
                        }
                        append_wal(
                            &mut wal_store,
                            WalOp::TicketsPurchased {
                                buyer,
                                requested: bag,
                                offered_payment: payment,
                                at_ms,
                            },
                        )
                        .await;
                    }
                    Err(e) => println!("Rejected: {}", e),
                }
            }
            "list" => {
                let line = read_line("Enter seller id, ask price, and tier/qty pairs (e.g., '1 12 front 2'):")?;
                let parts: Vec<&str> = line.split_whitespace().collect();
                if parts.len() < 4 {
                    println!("Usage: seller ask tier qty [tier qty ...]");
                    continue;
                }
                let (Ok(seller), Ok(ask)) = (parts[0].parse::<u64>(), parts[1].parse::<u64>())
                else {
                    println!("Invalid numbers");
                    continue;
                };
                let Some(bag) = parse_bag(&parts[2..]) else {
                    println!("Invalid tier/qty pairs");
                    continue;
                };
                let listing = ResaleListing { tickets_offered: bag.clone(), ask_price: ask };
                match market.list_for_resale(seller, &listing) {
                    Ok((id, receipt)) => {
                        println!("Listed {} as listing {}", bag, id);
                        print_receipt(&receipt);
                        append_wal(
                            &mut wal_store,
                            WalOp::ListingCreated { seller, tickets: bag, ask_price: ask },
                        )
                        .await;
                    }
                    Err(e) => println!("Rejected: {}", e),
                }
            }
            "accept" => {
                let line = read_line("Enter buyer id, listing id, and payment (e.g., '2 0 12'):")?;
                let parts: Vec<&str> = line.split_whitespace().collect();
                let [buyer, listing, payment] = parts.as_slice() else {
                    println!("Usage: buyer listing payment");
                    continue;
                };
                let (Ok(buyer), Ok(listing), Ok(payment)) = (
                    buyer.parse::<u64>(),
                    listing.parse::<u64>(),
                    payment.parse::<u64>(),
                ) else {
                    println!("Invalid numbers");
                    continue;
                };
                match market.accept_resale(buyer, ListingId(listing), payment) {
                    Ok(receipt) => {
                        println!("Listing {} settled", listing);
                        print_receipt(&receipt);
                        append_wal(
                            &mut wal_store,
                            WalOp::ListingAccepted { listing, buyer, payment },
                        )
                        .await;
                    }
                    Err(e) => println!("Rejected: {}", e),
                }
            }
            "listings" => {
                let mut any = false;
                for (id, listing) in market.listings() {
                    println!(
                        "  #{} seller {} asks {} for {} [{}]",
                        id,
                        listing.seller,
                        listing.ask_price,
                        listing.tickets,
                        if listing.open { "open" } else { "closed" },
                    );
                    any = true;
                }
                if !any {
                    println!("No listings");
                }
            }
            "price" => {
                println!("\n=== Pricing ===");
                for tier in market.pricing().iter() {
                    println!("  {:<10} price {} capacity {}", tier.name, tier.unit_price, tier.capacity);
                }
                println!("===============\n");
            }
            "stock" | "state" => {
                print_stock(&market);
            }
            "holdings" => {
                let line = read_line("Enter party id:")?;
                let Ok(party) = line.parse::<u64>() else {
                    println!("Invalid party id");
                    continue;
                };
                let holding = market.escrow().holding_of(Party::Patron(party));
                println!("Party {}: funds {}, tickets {}", party, holding.funds, holding.tickets);
            }
            "payout" => {
                let line = read_line("Enter party id:")?;
                let Ok(party) = line.parse::<u64>() else {
                    println!("Invalid party id");
                    continue;
                };
                let amount = market.escrow_mut().payout(Party::Patron(party));
                println!("Paid out {} to party {}", amount, party);
            }
            "snapshot" => {
                if let Some(store) = snap_store.as_mut() {
                    let snap = snapshot::from_market(&market);
                    match store.save_snapshot(&snap).await {
                        Ok(()) => println!("Saved snapshot for {}", event),
                        Err(e) => eprintln!("Error saving snapshot: {:?}", e),
                    }
                } else {
                    println!("Persistence is disabled (no DATABASE_URL)");
                }
            }
            "quit" | "q" | "exit" => {
                println!("Goodbye!");
                break;
            }
            "" => continue,
            _ => {
                println!("Unknown command. Type 'help' for available commands.");
            }
        }
    }

    Ok(())
}
