fn main() -> std::process::ExitCode {
  jellycli::run()
}
