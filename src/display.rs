use crate::model::{Professor, Project};
use crate::workflow::FetchSummary;

pub fn display_professors(professors: &[Professor]) {
    if professors.is_empty() {
        println!("No professors registered.");
        return;
    }
    for p in professors {
        print!("{:>5}  {} - pi_profile_id {}", p.id.0, p, p.pi_profile_id);
        if let Some(at) = p.last_projects_fetch {
            print!(" (fetched {})", at.format("%Y-%m-%d %H:%M"));
        }
        println!();
    }
}

pub fn display_professor(professor: &Professor, projects: &[Project]) {
    println!("{professor}");
    println!("  PI profile id: {}", professor.pi_profile_id);
    match professor.last_projects_fetch {
        Some(at) => println!("  Last fetch: {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("  Last fetch: never"),
    }
    if projects.is_empty() {
        println!("  No projects.");
        return;
    }
    println!("  Projects ({}):", projects.len());
    for p in projects {
        print!("    - {} {} ({})", p.fiscal_year, p.project_num, p.appl_id);
        if let Some(org) = &p.organization {
            print!(", {org}");
        }
        if let (Some(start), Some(end)) = (p.project_start_date, p.project_end_date) {
            print!(", {start} to {end}");
        }
        println!();
        if let Some(section) = &p.full_study_section {
            println!("      {section}");
        }
    }
}

pub fn display_summary(professor: &Professor, summary: &FetchSummary) {
    println!(
        "{}: {} page(s), {} new project(s), {} updated, {} new link(s)",
        professor, summary.pages, summary.created, summary.updated, summary.linked
    );
    if summary.interrupted {
        println!("  Warning: the registry could not be queried, results may be incomplete");
    }
}
