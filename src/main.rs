use clap::Parser;

fn main() -> anyhow::Result<()> {
    let cfg = hidhub::config::Config::parse();
    hidhub::run(cfg)
}
