use console::Style;

use deneb_core::config::{Combination, IntegrationConfig, Rejection};

struct Styles {
    title: Style,
    header: Style,
    label: Style,
    value: Style,
    method: Style,
    disabled: Style,
}

impl Styles {
    fn new() -> Self {
        Self {
            title: Style::new().cyan().bold(),
            header: Style::new().cyan().bold(),
            label: Style::new().dim(),
            value: Style::new().bold().white(),
            method: Style::new().green(),
            disabled: Style::new().dim().yellow(),
        }
    }
}

pub fn print_run_summary(config: &IntegrationConfig, frame_count: usize) {
    let s = Styles::new();

    println!();
    println!("  {}", s.title.apply_to("Deneb Integration"));
    println!(
        "  {}",
        s.title
            .apply_to("\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}")
    );
    println!();

    println!(
        "  {:<14}{}",
        s.label.apply_to("Frames"),
        s.value.apply_to(frame_count)
    );
    println!();

    println!("  {}", s.header.apply_to("Combination"));
    println!(
        "    {:<14}{}",
        s.label.apply_to("Operation"),
        s.method.apply_to(config.combination)
    );
    println!(
        "    {:<14}{}",
        s.label.apply_to("Normalized"),
        s.value.apply_to(config.output_normalization)
    );
    if config.combination == Combination::Mean {
        println!(
            "    {:<14}{}",
            s.label.apply_to("Weights"),
            s.value.apply_to(config.weights.mode)
        );
    }
    println!();

    if config.rejection == Rejection::None {
        println!(
            "  {:<14}{}",
            s.header.apply_to("Rejection"),
            s.disabled.apply_to("disabled")
        );
    } else {
        println!("  {}", s.header.apply_to("Rejection"));
        println!(
            "    {:<14}{}",
            s.label.apply_to("Algorithm"),
            s.method.apply_to(config.rejection)
        );
        println!(
            "    {:<14}{}",
            s.label.apply_to("Normalized"),
            s.value.apply_to(config.rejection_normalization)
        );
        if config.large_scale.any_enabled() {
            println!(
                "    {:<14}low={} high={}",
                s.label.apply_to("Large-scale"),
                config.large_scale.low.enabled,
                config.large_scale.high.enabled
            );
        }
    }
    println!();
}
