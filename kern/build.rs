fn main() {
    build_util::expose_target_arch();
    build_util::expose_target_board();
}
