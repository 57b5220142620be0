//! Command-line front end for the voting booth.
//!
//! Offline helpers build trees and proofs, encode leaves and preview ballot
//! charges. `cast` and `sweep` run the booth against collaborator state kept
//! as JSON files (`cards.json`, `voice.json`, `votes.json`) in a state directory.

use k256::ecdsa::SigningKey;
use num_bigint::{BigInt, BigUint};
use std::{
    env,
    path::{Path, PathBuf},
};
use voting_booth::{
    address_of, decode_leaf, digest_from_hex, digest_to_hex, encode_leaf, format_units,
    parse_units, plan_ballot, sign_consolidation, Address, BoothConfig, CardRegistry, CardWallet,
    Collaborators, CompactProof, MemoryLedger, SparseMerkleTree, SweepSignature, TokenLedger,
    VotingBooth, DEFAULT_DEPTH,
};

fn fatal(message: &str) -> ! {
    eprintln!("{message}");
    std::process::exit(1);
}

fn print_help() {
    println!("Usage: booth <command> ...");
    println!("  root [--depth <N>] [--leaf <index>=<units>]...");
    println!("  proof --index <N> [--depth <N>] [--leaf <index>=<units>]... [--compact]");
    println!("  encode <units>");
    println!("  decode <leaf_hex>");
    println!("  plan <previous_units> <next_units>");
    println!("  check-config <booth.json>");
    println!("  mint --state <dir> --to <address> (--card <id> | --ledger <voice|votes> --amount <units>)");
    println!("  approve --state <dir> --owner <address> --spender <address> (--card <id> | --ledger <voice|votes> --amount <units>)");
    println!("  cast --config <booth.json> --state <dir> --card <id> --next <units> [--leaf <index>=<units>]...");
    println!("  sweep --config <booth.json> --state <dir> --ledger <voice|votes> --v <v> --r <hex> --s <hex>");
    println!("  sign-consolidation --booth <address> --key <hex>");
}

fn main() {
    env_logger::init();
    let mut args = env::args().skip(1);
    let command = args.next();
    let tail: Vec<String> = args.collect();
    match command.as_deref() {
        Some("root") => cmd_root(tail),
        Some("proof") => cmd_proof(tail),
        Some("encode") => cmd_encode(tail),
        Some("decode") => cmd_decode(tail),
        Some("plan") => cmd_plan(tail),
        Some("check-config") => cmd_check_config(tail),
        Some("mint") => cmd_mint(tail),
        Some("approve") => cmd_approve(tail),
        Some("cast") => cmd_cast(tail),
        Some("sweep") => cmd_sweep(tail),
        Some("sign-consolidation") => cmd_sign_consolidation(tail),
        Some("-h") | Some("--help") => print_help(),
        _ => {
            print_help();
            std::process::exit(1);
        }
    }
}

fn parse_leaf_flag(value: &str) -> (u64, BigInt) {
    let (index, units) = value
        .split_once('=')
        .unwrap_or_else(|| fatal("--leaf expects <index>=<units>"));
    let index = index
        .parse::<u64>()
        .unwrap_or_else(|_| fatal(&format!("invalid leaf index '{index}'")));
    let weight = parse_units(units).unwrap_or_else(|err| fatal(&err.to_string()));
    (index, weight)
}

fn parse_units_arg(value: &str) -> BigInt {
    parse_units(value).unwrap_or_else(|err| fatal(&err.to_string()))
}

/// Options shared by commands that rebuild a tree from `--leaf` flags.
struct TreeArgs {
    depth: usize,
    leaves: Vec<(u64, BigInt)>,
    rest: Vec<(String, String)>,
    switches: Vec<String>,
}

fn parse_tree_args(args: Vec<String>, switches: &[&str]) -> TreeArgs {
    let mut parsed = TreeArgs {
        depth: DEFAULT_DEPTH,
        leaves: Vec::new(),
        rest: Vec::new(),
        switches: Vec::new(),
    };
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        if switches.contains(&arg.as_str()) {
            parsed.switches.push(arg);
            continue;
        }
        let value = iter
            .next()
            .unwrap_or_else(|| fatal(&format!("{arg} expects a value")));
        match arg.as_str() {
            "--depth" => {
                parsed.depth = value
                    .parse()
                    .unwrap_or_else(|_| fatal("--depth expects an integer"));
            }
            "--leaf" => parsed.leaves.push(parse_leaf_flag(&value)),
            _ => parsed.rest.push((arg, value)),
        }
    }
    parsed
}

fn flag<'a>(rest: &'a [(String, String)], name: &str) -> Option<&'a str> {
    rest.iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

fn required<'a>(rest: &'a [(String, String)], name: &str) -> &'a str {
    flag(rest, name).unwrap_or_else(|| fatal(&format!("missing {name}")))
}

fn build_tree(depth: usize, leaves: &[(u64, BigInt)]) -> SparseMerkleTree {
    let mut tree = SparseMerkleTree::new(depth).unwrap_or_else(|err| fatal(&err.to_string()));
    for (index, weight) in leaves {
        let leaf = encode_leaf(weight).unwrap_or_else(|err| fatal(&err.to_string()));
        tree.insert(*index, leaf)
            .unwrap_or_else(|err| fatal(&err.to_string()));
    }
    tree
}

fn cmd_root(args: Vec<String>) {
    let parsed = parse_tree_args(args, &[]);
    let tree = build_tree(parsed.depth, &parsed.leaves);
    println!("{}", digest_to_hex(&tree.root()));
}

fn cmd_proof(args: Vec<String>) {
    let parsed = parse_tree_args(args, &["--compact"]);
    let index = required(&parsed.rest, "--index")
        .parse::<u64>()
        .unwrap_or_else(|_| fatal("--index expects an integer"));
    let tree = build_tree(parsed.depth, &parsed.leaves);
    let proof = tree
        .create_proof(index)
        .unwrap_or_else(|err| fatal(&err.to_string()));
    if parsed.switches.iter().any(|s| s == "--compact") {
        let compact = CompactProof::compress(&proof, tree.defaults())
            .unwrap_or_else(|err| fatal(&err.to_string()));
        println!("0x{}", hex::encode(compact.to_bytes()));
    } else {
        println!("{}", proof.to_json_string());
    }
}

fn cmd_encode(args: Vec<String>) {
    let value = args
        .first()
        .unwrap_or_else(|| fatal("Usage: booth encode <units>"));
    let leaf = encode_leaf(&parse_units_arg(value)).unwrap_or_else(|err| fatal(&err.to_string()));
    println!("{}", digest_to_hex(&leaf));
}

fn cmd_decode(args: Vec<String>) {
    let value = args
        .first()
        .unwrap_or_else(|| fatal("Usage: booth decode <leaf_hex>"));
    let leaf = digest_from_hex(value).unwrap_or_else(|err| fatal(&err));
    let weight = decode_leaf(&leaf);
    println!("{} ({} units)", weight, format_units(&weight));
}

fn cmd_plan(args: Vec<String>) {
    if args.len() < 2 {
        fatal("Usage: booth plan <previous_units> <next_units>");
    }
    let previous = parse_units_arg(&args[0]);
    let next = parse_units_arg(&args[1]);
    let plan = plan_ballot(&previous, &next).unwrap_or_else(|err| fatal(&err.to_string()));
    let side = plan
        .side
        .map(|side| side.to_string())
        .unwrap_or_else(|| "none".to_string());
    println!(
        "BALLOT|prev={}|next={}|side={side}|charge={}|tally={}",
        format_units(&plan.previous),
        format_units(&plan.next),
        format_units(&BigInt::from(plan.charge.clone())),
        format_units(&BigInt::from(plan.tally.clone())),
    );
}

fn load_config(path: &str) -> BoothConfig {
    BoothConfig::load(Path::new(path)).unwrap_or_else(|err| fatal(&err.to_string()))
}

fn cmd_check_config(args: Vec<String>) {
    let path = args
        .first()
        .unwrap_or_else(|| fatal("Usage: booth check-config <booth.json>"));
    let config = load_config(path);
    let booth = VotingBooth::new(config).unwrap_or_else(|err| fatal(&err.to_string()));
    println!(
        "CONFIG|booth={}|motion={}|depth={}|empty_root={}",
        booth.config().booth,
        booth.config().motion_id,
        booth.config().tree_depth,
        digest_to_hex(&booth.defaults().empty_root())
    );
}

struct StatePaths {
    cards: PathBuf,
    voice: PathBuf,
    votes: PathBuf,
}

impl StatePaths {
    fn new(dir: &str) -> Self {
        let dir = PathBuf::from(dir);
        Self {
            cards: dir.join("cards.json"),
            voice: dir.join("voice.json"),
            votes: dir.join("votes.json"),
        }
    }

    fn load(&self) -> Collaborators<CardRegistry, MemoryLedger> {
        Collaborators {
            cards: CardRegistry::load(&self.cards).unwrap_or_else(|err| fatal(&err.to_string())),
            voice_credits: MemoryLedger::load(&self.voice, "VOICE")
                .unwrap_or_else(|err| fatal(&err.to_string())),
            votes: MemoryLedger::load(&self.votes, "VOTE")
                .unwrap_or_else(|err| fatal(&err.to_string())),
        }
    }

    fn save(&self, state: &Collaborators<CardRegistry, MemoryLedger>) {
        state
            .cards
            .save(&self.cards)
            .unwrap_or_else(|err| fatal(&err.to_string()));
        state
            .voice_credits
            .save(&self.voice)
            .unwrap_or_else(|err| fatal(&err.to_string()));
        state
            .votes
            .save(&self.votes)
            .unwrap_or_else(|err| fatal(&err.to_string()));
    }
}

fn parse_address(rest: &[(String, String)], name: &str) -> Address {
    required(rest, name)
        .parse()
        .unwrap_or_else(|err: String| fatal(&format!("{name}: {err}")))
}

fn select_ledger<'a>(
    state: &'a mut Collaborators<CardRegistry, MemoryLedger>,
    name: &str,
) -> &'a mut MemoryLedger {
    match name {
        "voice" => &mut state.voice_credits,
        "votes" => &mut state.votes,
        other => fatal(&format!("unknown ledger '{other}' (expected voice|votes)")),
    }
}

fn parse_amount(rest: &[(String, String)]) -> BigUint {
    let amount = parse_units_arg(required(rest, "--amount"));
    amount
        .to_biguint()
        .unwrap_or_else(|| fatal("--amount must not be negative"))
}

fn cmd_mint(args: Vec<String>) {
    let parsed = parse_tree_args(args, &[]);
    let paths = StatePaths::new(required(&parsed.rest, "--state"));
    let to = parse_address(&parsed.rest, "--to");
    let mut state = paths.load();
    if let Some(card) = flag(&parsed.rest, "--card") {
        let card = card
            .parse::<u64>()
            .unwrap_or_else(|_| fatal("--card expects an integer"));
        state
            .cards
            .mint(&to, card)
            .unwrap_or_else(|err| fatal(&err.to_string()));
        println!("MINT|card={card}|owner={to}");
    } else {
        let amount = parse_amount(&parsed.rest);
        let ledger = select_ledger(&mut state, required(&parsed.rest, "--ledger"));
        ledger.mint(&to, amount.clone());
        println!("MINT|symbol={}|to={to}|amount={amount}", ledger.symbol);
    }
    paths.save(&state);
}

fn cmd_approve(args: Vec<String>) {
    let parsed = parse_tree_args(args, &[]);
    let paths = StatePaths::new(required(&parsed.rest, "--state"));
    let owner = parse_address(&parsed.rest, "--owner");
    let spender = parse_address(&parsed.rest, "--spender");
    let mut state = paths.load();
    if let Some(card) = flag(&parsed.rest, "--card") {
        let card = card
            .parse::<u64>()
            .unwrap_or_else(|_| fatal("--card expects an integer"));
        state
            .cards
            .approve(&owner, &spender, card)
            .unwrap_or_else(|err| fatal(&err.to_string()));
        println!("APPROVE|card={card}|operator={spender}");
    } else {
        let amount = parse_amount(&parsed.rest);
        let ledger = select_ledger(&mut state, required(&parsed.rest, "--ledger"));
        ledger.approve(&owner, &spender, amount.clone());
        println!(
            "APPROVE|symbol={}|owner={owner}|spender={spender}|amount={amount}",
            ledger.symbol
        );
    }
    paths.save(&state);
}

fn cmd_cast(args: Vec<String>) {
    let parsed = parse_tree_args(args, &[]);
    let config = load_config(required(&parsed.rest, "--config"));
    let paths = StatePaths::new(required(&parsed.rest, "--state"));
    let card = required(&parsed.rest, "--card")
        .parse::<u64>()
        .unwrap_or_else(|_| fatal("--card expects an integer"));
    let next = parse_units_arg(required(&parsed.rest, "--next"));

    let booth = VotingBooth::new(config).unwrap_or_else(|err| fatal(&err.to_string()));
    let wallet = CardWallet::from_weights(card, booth.config().tree_depth, parsed.leaves)
        .unwrap_or_else(|err| fatal(&err.to_string()));
    let request = wallet
        .draft(booth.config().motion_id, next)
        .unwrap_or_else(|err| fatal(&err.to_string()));
    let mut state = paths.load();
    let receipt = booth
        .cast_ballot(&mut state, &request)
        .unwrap_or_else(|err| fatal(&err.to_string()));
    paths.save(&state);
    println!(
        "CAST|card={}|voter={}|charge={}|tally={}|root={}",
        receipt.card_id,
        receipt.voter,
        receipt.plan.charge,
        receipt.plan.tally,
        digest_to_hex(&receipt.new_root)
    );
}

fn parse_word(value: &str, name: &str) -> [u8; 32] {
    digest_from_hex(value).unwrap_or_else(|err| fatal(&format!("{name}: {err}")))
}

fn cmd_sweep(args: Vec<String>) {
    let parsed = parse_tree_args(args, &[]);
    let config = load_config(required(&parsed.rest, "--config"));
    let paths = StatePaths::new(required(&parsed.rest, "--state"));
    let signature = SweepSignature {
        v: required(&parsed.rest, "--v")
            .parse()
            .unwrap_or_else(|_| fatal("--v expects an integer")),
        r: parse_word(required(&parsed.rest, "--r"), "--r"),
        s: parse_word(required(&parsed.rest, "--s"), "--s"),
    };
    let booth = VotingBooth::new(config).unwrap_or_else(|err| fatal(&err.to_string()));
    let mut state = paths.load();
    let ledger = select_ledger(&mut state, required(&parsed.rest, "--ledger"));
    let swept = booth
        .consolidate(ledger, &signature)
        .unwrap_or_else(|err| fatal(&err.to_string()));
    paths.save(&state);
    println!("SWEEP|to={}|amount={swept}", booth.config().consolidator);
}

fn cmd_sign_consolidation(args: Vec<String>) {
    let parsed = parse_tree_args(args, &[]);
    let booth = parse_address(&parsed.rest, "--booth");
    let key_hex = required(&parsed.rest, "--key");
    let key_bytes = hex::decode(key_hex.trim_start_matches("0x"))
        .unwrap_or_else(|err| fatal(&format!("invalid key hex: {err}")));
    let key = SigningKey::from_slice(&key_bytes).unwrap_or_else(|err| fatal(&err.to_string()));
    let signature = sign_consolidation(&key, &booth).unwrap_or_else(|err| fatal(&err.to_string()));
    let signer = address_of(key.verifying_key()).unwrap_or_else(|err| fatal(&err.to_string()));
    println!(
        "SIGNATURE|signer={signer}|v={}|r=0x{}|s=0x{}",
        signature.v,
        hex::encode(signature.r),
        hex::encode(signature.s)
    );
}
