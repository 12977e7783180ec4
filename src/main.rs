fn main() {
    laplog_lib::run()
}
