fn main() -> anyhow::Result<()> {
    datameter_lib::run()
}
