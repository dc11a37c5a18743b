//! Environment overrides live in their own test binary so no other test observes the mutation.

use signreel::GeneratorConfig;
use signreel::config::ENDPOINT_ENV;

#[test]
fn endpoint_env_overrides_default_unless_blank() {
    let default_endpoint = GeneratorConfig::default().endpoint;

    // SAFETY: this is the only test in this binary, so nothing else reads the environment.
    unsafe { std::env::set_var(ENDPOINT_ENV, "http://10.0.0.7:9000/get_frames") };
    let cfg = GeneratorConfig::default().with_env_overrides();
    assert_eq!(cfg.endpoint, "http://10.0.0.7:9000/get_frames");
    cfg.validate().unwrap();

    unsafe { std::env::set_var(ENDPOINT_ENV, "   ") };
    let cfg = GeneratorConfig::default().with_env_overrides();
    assert_eq!(cfg.endpoint, default_endpoint);

    unsafe { std::env::remove_var(ENDPOINT_ENV) };
    let cfg = GeneratorConfig::default().with_env_overrides();
    assert_eq!(cfg.endpoint, default_endpoint);
}
