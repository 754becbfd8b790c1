// Demo bootstrap data. Strictly a startup convenience: nothing in the
// storage contract depends on it, and it is skipped entirely once any user
// exists so restarts against Postgres do not duplicate rows.

use chrono::{Duration, Utc};
use tracing::info;

use crate::auth;
use crate::error::AppResult;
use crate::models::{
    NewComment, NewConnection, NewEvent, NewGroup, NewGroupMember, NewLike, NewPost, NewUser,
};
use crate::storage::Storage;

const DEMO_PASSWORD: &str = "password123";

pub async fn seed_demo_data(storage: &dyn Storage) -> AppResult<()> {
    if !storage.get_all_users().await?.is_empty() {
        info!("Storage already has users, skipping demo seed");
        return Ok(());
    }

    let password = auth::hash_password(DEMO_PASSWORD)?;

    let anjali = storage
        .create_user(NewUser {
            username: "anjali".to_string(),
            password: password.clone(),
            full_name: "Anjali Saini".to_string(),
            email: "anjali@sainiconnect.com".to_string(),
            profile_image: None,
            cover_image: None,
            bio: Some(
                "Software engineer passionate about connecting the Saini community worldwide."
                    .to_string(),
            ),
            location: Some("Delhi, India".to_string()),
            occupation: Some("Software Engineer".to_string()),
        })
        .await?;

    let rajesh = storage
        .create_user(NewUser {
            username: "rajesh".to_string(),
            password: password.clone(),
            full_name: "Rajesh Saini".to_string(),
            email: "rajesh@sainiconnect.com".to_string(),
            profile_image: None,
            cover_image: None,
            bio: Some("Entrepreneur and community leader.".to_string()),
            location: Some("Mumbai, India".to_string()),
            occupation: Some("Business Owner".to_string()),
        })
        .await?;

    let priya = storage
        .create_user(NewUser {
            username: "priya".to_string(),
            password,
            full_name: "Priya Saini".to_string(),
            email: "priya@sainiconnect.com".to_string(),
            profile_image: None,
            cover_image: None,
            bio: Some("Food blogger and culinary enthusiast.".to_string()),
            location: Some("Jaipur, India".to_string()),
            occupation: Some("Food Blogger".to_string()),
        })
        .await?;

    let leadership_post = storage
        .create_post(NewPost {
            user_id: rajesh.id,
            content: "Excited to share that our Saini Youth Leadership program is now accepting \
                      applications for the summer batch! Tag someone who might be interested."
                .to_string(),
            images: vec![],
            visibility: None,
        })
        .await?;

    let recipe_post = storage
        .create_post(NewPost {
            user_id: priya.id,
            content: "Just tried recreating my grandmother's special Saini-style kadhi recipe. \
                      Would love to organize a virtual cooking session - who's interested?"
                .to_string(),
            images: vec![],
            visibility: None,
        })
        .await?;

    storage
        .create_comment(NewComment {
            post_id: leadership_post.id,
            user_id: anjali.id,
            content: "This is such a valuable initiative! Will definitely share with my cousins."
                .to_string(),
            parent_id: None,
        })
        .await?;

    storage
        .create_comment(NewComment {
            post_id: recipe_post.id,
            user_id: rajesh.id,
            content: "Looks delicious! Absolutely interested in the cooking session.".to_string(),
            parent_id: None,
        })
        .await?;

    for (post_id, user_id) in [
        (leadership_post.id, anjali.id),
        (leadership_post.id, priya.id),
        (recipe_post.id, anjali.id),
        (recipe_post.id, rajesh.id),
    ] {
        storage
            .create_like(NewLike {
                post_id,
                user_id,
                kind: None,
            })
            .await?;
    }

    let now = Utc::now();
    storage
        .create_event(NewEvent {
            title: "Saini Cultural Festival".to_string(),
            description: "Annual cultural gathering featuring traditional music, dance, and food."
                .to_string(),
            location: "Delhi Convention Center".to_string(),
            date: now + Duration::days(30),
            end_date: Some(now + Duration::days(30) + Duration::hours(7)),
            image: None,
            created_by: anjali.id,
        })
        .await?;

    storage
        .create_event(NewEvent {
            title: "Community Meetup".to_string(),
            description: "Virtual networking event for community members around the world."
                .to_string(),
            location: "Virtual Event".to_string(),
            date: now + Duration::days(45),
            end_date: Some(now + Duration::days(45) + Duration::minutes(90)),
            image: None,
            created_by: anjali.id,
        })
        .await?;

    let business_group = storage
        .create_group(NewGroup {
            name: "Saini Business Network".to_string(),
            description: Some(
                "A group for entrepreneurs and business professionals from the community."
                    .to_string(),
            ),
            image: None,
            created_by: rajesh.id,
        })
        .await?;

    storage
        .create_group(NewGroup {
            name: "Saini Heritage & Culture".to_string(),
            description: Some(
                "Preserving and celebrating our rich cultural heritage and traditions.".to_string(),
            ),
            image: None,
            created_by: anjali.id,
        })
        .await?;

    storage
        .add_group_member(NewGroupMember {
            group_id: business_group.id,
            user_id: anjali.id,
            role: None,
        })
        .await?;

    storage
        .create_connection(NewConnection {
            requester_id: rajesh.id,
            addressee_id: anjali.id,
        })
        .await?;

    info!("Seeded demo data (3 users, 2 posts, 2 events, 2 groups)");
    Ok(())
}
