//! Tests for remote path helpers.

use super::super::*;
use rstest::rstest;

#[rstest]
#[case("/a/", "/b", "/a/b")]
#[case("a", "b", "a/b")]
#[case("a/", "b/", "a/b/")]
#[case("/home/padmin//", "//images/vm.img", "/home/padmin/images/vm.img")]
#[case("/", "etc", "/etc")]
fn remote_join_uses_exactly_one_separator(
    #[case] first: &str,
    #[case] second: &str,
    #[case] expected: &str,
) {
    assert_eq!(remote_join(first, second), expected);
}

#[rstest]
#[case("/var/snap/vm.img", ("/var/snap", "vm.img"))]
#[case("/vm.img", ("/", "vm.img"))]
#[case("vm.img", (".", "vm.img"))]
fn split_remote_separates_directory_and_name(
    #[case] path: &str,
    #[case] expected: (&str, &str),
) {
    assert_eq!(split_remote(path), expected);
}

#[rstest]
fn expand_tilde_leaves_absolute_paths_alone() {
    assert_eq!(expand_tilde("/keys/ivm"), "/keys/ivm");
}
