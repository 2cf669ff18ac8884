use crate::platform::types;

/// Map octocrab Issue to our platform Issue type.
pub fn map_issue(
    issue: &octocrab::models::issues::Issue,
    comments: Vec<octocrab::models::issues::Comment>,
) -> types::Issue {
    types::Issue {
        number: issue.number,
        title: issue.title.clone(),
        body: issue.body.clone().unwrap_or_default(),
        labels: issue.labels.iter().map(|l| l.name.clone()).collect(),
        comments: comments.into_iter().map(map_comment).collect(),
    }
}

fn map_comment(comment: octocrab::models::issues::Comment) -> types::Comment {
    types::Comment {
        id: comment.id.into_inner(),
        author: comment.user.login,
        body: comment.body.unwrap_or_default(),
    }
}

pub fn map_pull_request(pr: octocrab::models::pulls::PullRequest) -> types::PullRequest {
    types::PullRequest {
        number: pr.number,
        url: pr.html_url.map(|u| u.to_string()).unwrap_or_default(),
        title: pr.title.unwrap_or_default(),
        head_branch: pr.head.ref_field,
        base_branch: pr.base.ref_field,
    }
}

pub fn map_repository(
    repo_full_name: &str,
    repo: octocrab::models::Repository,
) -> types::RepoInfo {
    types::RepoInfo {
        full_name: repo
            .full_name
            .unwrap_or_else(|| repo_full_name.to_string()),
        clone_url: repo
            .clone_url
            .map(|u| u.to_string())
            .unwrap_or_else(|| format!("https://github.com/{repo_full_name}.git")),
        default_branch: repo.default_branch.unwrap_or_else(|| "main".to_string()),
    }
}

pub fn map_created_issue(issue: octocrab::models::issues::Issue) -> types::CreatedIssue {
    types::CreatedIssue {
        number: issue.number,
        url: issue.html_url.to_string(),
    }
}
