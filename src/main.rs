fn main() -> anyhow::Result<()> {
    idlequit_lib::run()
}
