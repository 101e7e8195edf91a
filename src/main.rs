use std::io::Write;

use chrono::Utc;
use log::info;
use tokio::io::{stdin, AsyncBufReadExt, BufReader};

use raw_focus::auth::AuthService;
use raw_focus::common::models::FocusSession;
use raw_focus::config::AppConfig;
use raw_focus::services::user_service::ProfileUpdate;
use raw_focus::services::Services;

const HELP: &str = "\
Commands:
  /signup <email> <password> <username> <full name>
  /login <email> <password>
  /logout
  /me
  /bio <text>
  /avatar <image file>
  /focus <minutes> [project id]
  /search <username prefix>
  /add_friend <username>      /accept <username>      /reject <username>
  /remove_friend <username>   /friends                /requests
  /nudge <username>
  /create_group <name>        /join <code>            /leave <group id>
  /delete_group <group id>    /groups                 /members <group id>
  /projects                   /new_project <name>     /delete_project <project id>
  /achievements
  /notifications              /read_all
  /quality
  /help
  /quit";

async fn resolve_username(services: &Services, username: &str) -> Option<String> {
    services
        .users
        .search_users(username, None)
        .await
        .into_iter()
        .find(|p| p.username.eq_ignore_ascii_case(username))
        .map(|p| p.user_id)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env();
    std::env::set_var("RUST_LOG", &config.log_level);
    env_logger::init();

    let services = Services::from_config(&config).await?;
    let auth = AuthService::new(&services.store, services.users.clone(), &config).await?;
    info!("[CLI] Store ready at {}", config.database_url);

    if let Some(user) = auth.restore_session().await {
        println!("Welcome back, {}!", user.username);
    }
    println!("RAW focus shell. Type /help for commands.");

    let mut input = BufReader::new(stdin());
    let mut line = String::new();
    loop {
        line.clear();
        print!("> ");
        std::io::stdout().flush()?;
        if input.read_line(&mut line).await? == 0 {
            break;
        }
        let cmd = line.trim();
        if cmd.is_empty() {
            continue;
        }
        let mut parts = cmd.split_whitespace();
        let command = parts.next().unwrap_or("");
        let args: Vec<&str> = parts.collect();

        match command {
            "/help" => {
                println!("{}", HELP);
                continue;
            }
            "/quit" => break,
            "/signup" if args.len() >= 4 => {
                match auth.sign_up(args[0], args[1], &args[3..].join(" "), args[2]).await {
                    Ok(user) => println!("Account created. Signed in as {}.", user.username),
                    Err(e) => match e.downcast_ref::<raw_focus::auth::AuthError>() {
                        Some(auth_error) => println!("{}", auth_error.user_message()),
                        None => println!("Sign-up failed: {:#}", e),
                    },
                }
                continue;
            }
            "/login" if args.len() == 2 => {
                match auth.sign_in(args[0], args[1]).await {
                    Ok(user) => println!("Signed in as {}.", user.username),
                    Err(e) => println!("{}", e.user_message()),
                }
                continue;
            }
            "/quality" => {
                let quality = services.quality.current();
                println!("{:?} {:?}", quality, quality.policy());
                continue;
            }
            _ => {}
        }

        let Some(uid) = auth.current_uid().await else {
            println!("Sign in first (/login or /signup).");
            continue;
        };

        match (command, args.as_slice()) {
            ("/logout", []) => {
                auth.sign_out().await;
                println!("Signed out.");
            }
            ("/me", []) => match services.users.get_user_profile(&uid).await {
                Some(profile) => println!(
                    "{} (@{}) {:.1}h total, {:.1}h this month, streak {}, rank {:?}, {} sessions, {} groups",
                    profile.full_name,
                    profile.username,
                    profile.stats.focus_hours,
                    profile.stats.focus_hours_this_month,
                    profile.stats.day_streak,
                    profile.stats.rank,
                    profile.session_count,
                    profile.group_count
                ),
                None => println!("Profile unavailable."),
            },
            ("/bio", words) if !words.is_empty() => {
                let update = ProfileUpdate { bio: Some(words.join(" ")), ..Default::default() };
                match services.users.update_profile(&uid, update).await {
                    Ok(()) => println!("Bio updated."),
                    Err(e) => println!("Update failed: {:#}", e),
                }
            }
            ("/avatar", [path]) => match tokio::fs::read(path).await {
                Ok(bytes) => match services.images.upload_avatar(&uid, bytes).await {
                    Ok(url) => println!("Avatar stored at {}", url),
                    Err(e) => println!("Upload failed: {:#}", e),
                },
                Err(e) => println!("Cannot read {}: {}", path, e),
            },
            ("/focus", [minutes, rest @ ..]) => {
                let Ok(minutes) = minutes.parse::<u32>() else {
                    println!("Minutes must be a number.");
                    continue;
                };
                let project = rest.first().map(|p| p.to_string());
                let session = FocusSession::new(minutes, project, Utc::now());
                match services.complete_focus_session(&uid, session).await {
                    Some(outcome) => {
                        println!("Logged {} minutes. Total {:.2}h.", minutes, outcome.user.focus_hours);
                        for achievement in outcome.unlocked {
                            println!("Unlocked: {}", achievement.title);
                        }
                    }
                    None => println!("Session could not be recorded."),
                }
            }
            ("/search", [prefix]) => {
                for profile in services.users.search_users(prefix, Some(&uid)).await {
                    println!("@{} {} {:.1}h", profile.username, profile.full_name, profile.stats.focus_hours);
                }
            }
            ("/add_friend" | "/accept" | "/reject" | "/remove_friend" | "/nudge", [username]) => {
                let Some(other) = resolve_username(&services, username).await else {
                    println!("No user named {}.", username);
                    continue;
                };
                let ok = match command {
                    "/add_friend" => services.friends.send_friend_request(&uid, &other).await,
                    "/accept" => services.friends.accept_friend_request(&uid, &other).await,
                    "/reject" => services.friends.reject_friend_request(&uid, &other).await,
                    "/remove_friend" => services.friends.remove_friend(&uid, &other).await,
                    _ => services.friends.send_nudge(&uid, &other).await,
                };
                println!("{}", if ok { "Done." } else { "Not possible." });
            }
            ("/friends", []) => {
                for friend in services.friends.get_friends(&uid).await {
                    println!("@{} {:.1}h streak {}", friend.username, friend.stats.focus_hours, friend.stats.day_streak);
                }
            }
            ("/requests", []) => {
                for request in services.friends.get_pending_requests(&uid).await {
                    println!("incoming from @{}", request.username);
                }
                for request in services.friends.get_outgoing_requests(&uid).await {
                    println!("outgoing to @{}", request.username);
                }
            }
            ("/create_group", words) if !words.is_empty() => {
                match services.groups.create_group(&uid, &words.join(" "), None).await {
                    Some(group) => println!("Group {} created, invite code {}", group.group_id, group.invite_code),
                    None => println!("Group could not be created."),
                }
            }
            ("/join", [code]) => match services.groups.join_group(&uid, code).await {
                Some(group) => println!("Joined {} ({} members).", group.name, group.member_count),
                None => println!("Could not join with code {}.", code),
            },
            ("/leave", [group_id]) => {
                let ok = services.groups.leave_group(&uid, group_id).await;
                println!("{}", if ok { "Left the group." } else { "Not possible." });
            }
            ("/delete_group", [group_id]) => {
                let ok = services.groups.delete_group(&uid, group_id).await;
                println!("{}", if ok { "Group deleted." } else { "Not possible." });
            }
            ("/groups", []) => {
                for group in services.groups.get_user_groups(&uid).await {
                    println!("{} {} ({} members, code {})", group.group_id, group.name, group.member_count, group.invite_code);
                }
            }
            ("/members", [group_id]) => {
                for member in services.groups.get_group_members(group_id).await {
                    println!("@{} {:.1}h", member.username, member.stats.focus_hours);
                }
            }
            ("/projects", []) => {
                for project in services.projects.get_projects(&uid).await {
                    println!("{} {} {} min", project.project_id, project.name, project.total_minutes);
                }
            }
            ("/new_project", words) if !words.is_empty() => {
                match services.projects.create_project(&uid, &words.join(" "), None).await {
                    Some(project) => println!("Project {} created.", project.project_id),
                    None => println!("Project could not be created."),
                }
            }
            ("/delete_project", [project_id]) => {
                let ok = services.projects.delete_project(&uid, project_id).await;
                println!("{}", if ok { "Project deleted." } else { "Not possible." });
            }
            ("/achievements", []) => {
                for a in services.achievements.get_achievements(&uid).await {
                    println!("[{}] {} - {}", if a.is_unlocked { "x" } else { " " }, a.title, a.description);
                }
            }
            ("/notifications", []) => {
                for n in services.notifications.get_notifications(&uid).await {
                    println!("{} {}", if n.is_read { " " } else { "*" }, n.message);
                }
            }
            ("/read_all", []) => {
                services.notifications.mark_all_as_read(&uid).await;
            }
            _ => println!("Unknown command or wrong arguments. Type /help."),
        }
    }
    Ok(())
}
